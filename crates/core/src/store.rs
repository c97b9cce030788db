//! Server-side stores and the lock-guarded facade
//!
//! The block store and metadata store are plain in-memory structures; all
//! concurrency control lives in [`SyncServer`], which guards both behind a
//! single reader/writer lock at the service boundary.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::block::Block;
use crate::hash::BlockHash;
use crate::meta::FileMetadata;

/// Content-addressed block storage. Blocks are immutable and never
/// deleted; the store only grows.
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: HashMap<BlockHash, Block>,
}

impl BlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a block. An absent hash yields the empty block; absence is
    /// not signalled and callers must not rely on it.
    #[must_use]
    pub fn get(&self, hash: &BlockHash) -> Block {
        self.blocks.get(hash).cloned().unwrap_or_default()
    }

    /// Store a block under its derived content hash. Storing the same
    /// content twice is a no-op in effect.
    pub fn put(&mut self, block: Block) -> bool {
        let hash = block.hash();
        self.blocks.entry(hash).or_insert(block);
        true
    }

    /// The subset of `candidates` already stored, in no particular order.
    #[must_use]
    pub fn has_blocks(&self, candidates: &[BlockHash]) -> Vec<BlockHash> {
        candidates
            .iter()
            .filter(|h| self.blocks.contains_key(h))
            .copied()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Reply to a metadata update proposal.
///
/// Staleness is a value, not an error: a rejected proposal learns the
/// store's actual current version and nothing else changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReply {
    Accepted(u64),
    Stale { current: u64 },
}

/// Version-gated metadata storage: the concurrency-control kernel.
#[derive(Debug, Default)]
pub struct MetaStore {
    files: HashMap<String, FileMetadata>,
}

impl MetaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of the full filename -> metadata map.
    #[must_use]
    pub fn all(&self) -> HashMap<String, FileMetadata> {
        self.files.clone()
    }

    /// Single-key compare-and-swap keyed by expected predecessor version.
    ///
    /// Accepted when no entry exists yet (the proposed version becomes the
    /// baseline) or when the proposal is exactly one greater than the
    /// current version. Rejection reports the current version unchanged.
    pub fn update(&mut self, candidate: FileMetadata) -> UpdateReply {
        if let Some(current) = self.files.get(&candidate.filename) {
            if candidate.version != current.version + 1 {
                return UpdateReply::Stale {
                    current: current.version,
                };
            }
        }
        let version = candidate.version;
        self.files.insert(candidate.filename.clone(), candidate);
        UpdateReply::Accepted(version)
    }
}

/// Single-process facade over both stores.
///
/// Pure reads take the shared lock; anything that can mutate takes the
/// exclusive lock, which is what makes the version CAS race-free: two
/// concurrent updates for the same filename cannot interleave.
#[derive(Debug, Default)]
pub struct SyncServer {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    blocks: BlockStore,
    meta: MetaStore,
}

impl SyncServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn file_info_map(&self) -> HashMap<String, FileMetadata> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.meta.all()
    }

    pub fn update_file(&self, candidate: FileMetadata) -> UpdateReply {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.meta.update(candidate)
    }

    #[must_use]
    pub fn get_block(&self, hash: &BlockHash) -> Block {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.blocks.get(hash)
    }

    pub fn put_block(&self, block: Block) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.blocks.put(block)
    }

    /// Presence check. Mutates nothing, but deliberately takes the
    /// exclusive lock so it serializes against concurrent uploads.
    #[must_use]
    pub fn has_blocks(&self, candidates: &[BlockHash]) -> Vec<BlockHash> {
        let state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.blocks.has_blocks(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::HashList;

    fn meta<const N: usize>(filename: &str, version: u64, contents: [&[u8]; N]) -> FileMetadata {
        FileMetadata {
            filename: filename.to_string(),
            version,
            hashes: HashList::Blocks(contents.iter().map(|c| BlockHash::from_data(c)).collect()),
        }
    }

    #[test]
    fn test_get_absent_returns_empty_block() {
        let store = BlockStore::new();
        let block = store.get(&BlockHash::from_data(b"missing"));
        assert!(block.is_empty());
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut store = BlockStore::new();
        let block = Block::new(&b"block content"[..]);
        let hash = block.hash();

        assert!(store.put(block.clone()));
        assert!(store.put(block.clone()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&hash), block);
    }

    #[test]
    fn test_has_blocks_returns_stored_subset() {
        let mut store = BlockStore::new();
        let b1 = Block::new(&b"one"[..]);
        let b2 = Block::new(&b"two"[..]);
        let h1 = b1.hash();
        let h2 = b2.hash();
        let h3 = BlockHash::from_data(b"three");

        store.put(b1);
        store.put(b2);

        let present = store.has_blocks(&[h1, h2, h3]);
        assert_eq!(present.len(), 2);
        assert!(present.contains(&h1));
        assert!(present.contains(&h2));
        assert!(!present.contains(&h3));
    }

    #[test]
    fn test_first_write_stores_any_version() {
        let mut store = MetaStore::new();
        let reply = store.update(meta("a.txt", 7, [b"x"]));
        assert_eq!(reply, UpdateReply::Accepted(7));
    }

    #[test]
    fn test_versions_advance_by_exactly_one() {
        let mut store = MetaStore::new();
        assert_eq!(store.update(meta("a.txt", 1, [b"v1"])), UpdateReply::Accepted(1));
        assert_eq!(store.update(meta("a.txt", 2, [b"v2"])), UpdateReply::Accepted(2));
        assert_eq!(store.update(meta("a.txt", 3, [b"v3"])), UpdateReply::Accepted(3));
    }

    #[test]
    fn test_stale_update_reports_current_and_mutates_nothing() {
        let mut store = MetaStore::new();
        store.update(meta("a.txt", 1, [b"v1"]));
        store.update(meta("a.txt", 2, [b"v2"]));

        // Too old, a repeat, and a gap all reject the same way.
        for bad in [1, 2, 4, 9] {
            let reply = store.update(meta("a.txt", bad, [b"nope"]));
            assert_eq!(reply, UpdateReply::Stale { current: 2 });
        }
        assert_eq!(store.all().get("a.txt").unwrap().version, 2);
        assert_eq!(store.all().get("a.txt").unwrap().hashes, meta("a.txt", 2, [b"v2"]).hashes);
    }

    #[test]
    fn test_tombstone_occupies_a_versioned_slot() {
        let mut store = MetaStore::new();
        store.update(meta("a.txt", 1, [b"v1"]));
        let reply = store.update(FileMetadata {
            filename: "a.txt".to_string(),
            version: 2,
            hashes: HashList::Tombstone,
        });
        assert_eq!(reply, UpdateReply::Accepted(2));

        let all = store.all();
        let entry = all.get("a.txt").unwrap();
        assert!(entry.hashes.is_tombstone());
        assert_eq!(entry.version, 2);
    }

    #[test]
    fn test_facade_roundtrip() {
        let server = SyncServer::new();
        let block = Block::new(&b"payload"[..]);
        let hash = block.hash();

        server.put_block(block.clone());
        assert_eq!(server.get_block(&hash), block);
        assert_eq!(server.has_blocks(&[hash]), vec![hash]);

        assert_eq!(server.update_file(meta("f", 1, [b"payload"])), UpdateReply::Accepted(1));
        assert_eq!(server.file_info_map().len(), 1);
    }
}
