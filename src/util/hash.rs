//! Content hashing for integrity checks.
//!
//! Every artifact is identified by its Keccak-256 digest. The centralized
//! backup computes the same digest on its side, which is what makes the
//! backup-consistency check in [`crate::storage::StorageAggregator`] possible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// A 32-byte content digest.
///
/// Displayed as `0x`-prefixed lowercase hex. Parsing accepts the hex form
/// with or without the prefix, in either case.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

/// Error parsing a [`Hash`] from text.
#[derive(Debug, Error, PartialEq)]
pub enum ParseHashError {
    #[error("invalid hex in hash: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("hash must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl Hash {
    /// Wrap raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex form without the `0x` prefix.
    ///
    /// The centralized backup indexes objects by this form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(hex_part)?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseHashError::InvalidLength(len))?;
        Ok(Hash(bytes))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compute the content hash of a byte slice.
pub fn digest(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Check `data` against an expected hash.
///
/// With no expected hash there is nothing to check and the data is accepted:
/// resources fetched from a plain URI carry no integrity commitment.
pub fn verify(data: &[u8], expected: Option<&Hash>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    let actual = digest(data);
    if actual != *expected {
        tracing::error!("hash mismatch: expected {}, actual {}", expected, actual);
        return false;
    }

    true
}
