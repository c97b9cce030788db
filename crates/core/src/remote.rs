//! The seam between the sync engine and any transport

use std::collections::HashMap;

use color_eyre::Result;

use crate::block::Block;
use crate::hash::BlockHash;
use crate::meta::FileMetadata;
use crate::store::UpdateReply;

/// The five remote operations of the sync service.
///
/// Every operation is a pure request value in, result value out; a
/// transport error is the only `Err` case. A stale update is an
/// [`UpdateReply::Stale`] value, not an error.
pub trait RemoteStore {
    /// Point-in-time copy of the server's filename -> metadata map.
    fn file_info_map(&mut self) -> Result<HashMap<String, FileMetadata>>;

    /// Propose a metadata update; accepted only if the proposal's version
    /// is exactly one greater than the current (or the filename is new).
    fn update_file(&mut self, candidate: &FileMetadata) -> Result<UpdateReply>;

    /// Fetch one block. An absent hash yields the empty block.
    fn get_block(&mut self, hash: &BlockHash) -> Result<Block>;

    /// Store one block under its derived content hash.
    fn put_block(&mut self, block: Block) -> Result<bool>;

    /// The subset of `candidates` the server already has.
    fn has_blocks(&mut self, candidates: &[BlockHash]) -> Result<Vec<BlockHash>>;
}
