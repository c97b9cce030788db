//! Immutable content-addressed block payloads

use bytes::Bytes;

use crate::hash::BlockHash;

/// One fixed-size chunk of a file's content.
///
/// Identity is the content hash: the store never holds two blocks with the
/// same hash and different bytes. A missing block is represented by the
/// empty block, not by an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    data: Bytes,
}

impl Block {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The zero-value block returned for absent hashes
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Bytes {
        self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Derive the content address. The hash is always computed from the
    /// bytes, never supplied by a caller.
    #[must_use]
    pub fn hash(&self) -> BlockHash {
        BlockHash::from_data(&self.data)
    }
}
