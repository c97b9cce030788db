//! driftsync-core: Core synchronization engine
//!
//! Provides content-addressed block storage, version-gated file metadata,
//! the persisted local index, the wire codec, and the client sync engine.

pub mod block;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod hash;
pub mod index;
pub mod meta;
pub mod protocol;
pub mod remote;
pub mod store;

pub use block::Block;
pub use engine::{SyncEngine, SyncReport};
pub use hash::BlockHash;
pub use index::LocalIndex;
pub use meta::{FileInfo, FileMetadata, FileStatus, HashList};
pub use protocol::{Message, ProtocolReader, ProtocolWriter};
pub use remote::RemoteStore;
pub use store::{BlockStore, MetaStore, SyncServer, UpdateReply};
