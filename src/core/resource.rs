//! Resource descriptors.

use serde::{Deserialize, Serialize};

use crate::util::hash::{self, Hash};

/// A content descriptor: an optional integrity hash plus candidate locators.
///
/// When `hash` is present it is the identity of the content; every URI is
/// expected to serve bytes with that hash, and the centralized backup can
/// serve them by hash alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Content hash, if the publisher committed to one
    #[serde(default)]
    pub hash: Option<Hash>,

    /// Candidate locators, tried concurrently
    #[serde(default)]
    pub uris: Vec<String>,
}

/// The descriptor returned by a publish: the content hash and one locator per
/// backend that accepted the upload.
pub type StorageRef = ResourceRef;

impl ResourceRef {
    /// A hash-less reference to a single URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        ResourceRef {
            hash: None,
            uris: vec![uri.into()],
        }
    }

    /// A reference with a hash and locators.
    pub fn new(hash: Hash, uris: Vec<String>) -> Self {
        ResourceRef {
            hash: Some(hash),
            uris,
        }
    }

    /// A reference that can only be served by hash.
    pub fn from_hash(hash: Hash) -> Self {
        ResourceRef {
            hash: Some(hash),
            uris: Vec::new(),
        }
    }

    /// Whether the reference names anything at all.
    pub fn is_empty(&self) -> bool {
        self.hash.is_none() && self.uris.is_empty()
    }

    /// The first locator, used as the base for relative lookups.
    pub fn primary_uri(&self) -> Option<&str> {
        self.uris.first().map(String::as_str)
    }

    /// Check `data` against this reference's hash.
    pub fn verify(&self, data: &[u8]) -> bool {
        hash::verify(data, self.hash.as_ref())
    }
}
