//! Content-addressed hashing using BLAKE3

use std::fmt;

use color_eyre::eyre::ensure;
use color_eyre::Result;

/// A block's content address: a BLAKE3 (256-bit) digest of its bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap an already-computed digest
    #[must_use]
    pub fn from_raw(raw: [u8; 32]) -> Self {
        Self(raw)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex rendering (64 chars), as stored in the local index
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex rendering produced by [`Self::to_hex`].
    ///
    /// # Errors
    /// Returns an error if the input is not exactly 64 hex characters.
    pub fn parse_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        ensure!(bytes.len() == 32, "expected a 256-bit hash, got {} bytes", bytes.len());
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes);
        Ok(Self(raw))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlockHash({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}
