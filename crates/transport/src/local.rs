//! In-process transport: the server facade called directly, no sockets
//!
//! Used by the test suite, and usable for a single-process setup. The
//! facade's own locking still applies, so several `LocalStore`s may share
//! one server.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;

use driftsync_core::block::Block;
use driftsync_core::hash::BlockHash;
use driftsync_core::meta::FileMetadata;
use driftsync_core::remote::RemoteStore;
use driftsync_core::store::{SyncServer, UpdateReply};

/// A remote store backed by an in-process [`SyncServer`].
pub struct LocalStore {
    server: Arc<SyncServer>,
}

impl LocalStore {
    #[must_use]
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }
}

impl RemoteStore for LocalStore {
    fn file_info_map(&mut self) -> Result<HashMap<String, FileMetadata>> {
        Ok(self.server.file_info_map())
    }

    fn update_file(&mut self, candidate: &FileMetadata) -> Result<UpdateReply> {
        Ok(self.server.update_file(candidate.clone()))
    }

    fn get_block(&mut self, hash: &BlockHash) -> Result<Block> {
        Ok(self.server.get_block(hash))
    }

    fn put_block(&mut self, block: Block) -> Result<bool> {
        Ok(self.server.put_block(block))
    }

    fn has_blocks(&mut self, candidates: &[BlockHash]) -> Result<Vec<BlockHash>> {
        Ok(self.server.has_blocks(candidates))
    }
}
