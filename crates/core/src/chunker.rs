//! Fixed-size chunking
//!
//! Files are split at block-size boundaries in offset order; the final
//! chunk may be shorter. Hash lists are compared positionally, so the
//! same content always yields the same list.

use bytes::Bytes;

use crate::block::Block;
use crate::hash::BlockHash;

/// Split data into block-size chunks, in offset order.
#[must_use]
pub fn split_blocks(data: &[u8], block_size: usize) -> Vec<Block> {
    assert!(block_size > 0, "block size must be positive");
    data.chunks(block_size)
        .map(|chunk| Block::new(Bytes::copy_from_slice(chunk)))
        .collect()
}

/// The positional hash list for data split at block-size boundaries.
#[must_use]
pub fn hash_list(data: &[u8], block_size: usize) -> Vec<BlockHash> {
    assert!(block_size > 0, "block size must be positive");
    data.chunks(block_size).map(BlockHash::from_data).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_cover_entire_input() {
        let data: Vec<u8> = (0..100u8).collect();
        let blocks = split_blocks(&data, 16);

        let mut reassembled = Vec::new();
        for block in &blocks {
            reassembled.extend_from_slice(block.data());
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_final_chunk_may_be_short() {
        let data = [0u8; 10];
        let blocks = split_blocks(&data, 4);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].len(), 4);
        assert_eq!(blocks[1].len(), 4);
        assert_eq!(blocks[2].len(), 2);
    }

    #[test]
    fn test_empty_data_yields_no_blocks() {
        assert!(split_blocks(b"", 4).is_empty());
        assert!(hash_list(b"", 4).is_empty());
    }

    #[test]
    fn test_hash_list_matches_block_hashes() {
        let data = b"hello world, this spans several blocks";
        let blocks = split_blocks(data, 8);
        let hashes = hash_list(data, 8);
        assert_eq!(blocks.len(), hashes.len());
        for (block, hash) in blocks.iter().zip(&hashes) {
            assert_eq!(block.hash(), *hash);
        }
    }

    #[test]
    fn test_reordered_chunks_change_the_list() {
        let ab = hash_list(b"AAAABBBB", 4);
        let ba = hash_list(b"BBBBAAAA", 4);
        assert_eq!(ab.len(), 2);
        assert_eq!(ab[0], ba[1]);
        assert_ne!(ab, ba);
    }
}
