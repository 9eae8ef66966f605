//! Backend driver trait - common interface for all storage backends.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::core::uri::{type_of_uri, UriType};
use crate::storage::error::StorageError;
use crate::util::archive::ArchiveEntry;
use crate::util::hash::Hash;

/// Per-fetch deadline for network backends.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// A storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendType {
    /// Plain HTTP(S) hosting
    Http,
    /// IPFS, reached through a gateway
    Ipfs,
    /// The centralized backup, indexed by content hash
    Centralized,
}

impl BackendType {
    /// The backend that serves a locator, picked by its scheme.
    ///
    /// The centralized backup has no URI scheme of its own; it is only
    /// reached by hash.
    pub fn for_uri(uri: &str) -> Option<BackendType> {
        match type_of_uri(uri) {
            UriType::Http => Some(BackendType::Http),
            UriType::Ipfs => Some(BackendType::Ipfs),
            UriType::Ethereum | UriType::Ens | UriType::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Http => "http",
            BackendType::Ipfs => "ipfs",
            BackendType::Centralized => "centralized",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    /// Locator of the stored object
    pub uri: String,
    /// Content hash as computed by the backend, for backends that report one
    pub reported_hash: Option<String>,
}

impl Stored {
    pub fn at(uri: impl Into<String>) -> Self {
        Stored {
            uri: uri.into(),
            reported_hash: None,
        }
    }
}

/// A directory tree ready for upload.
///
/// Carries both the individual files and their packed tar archive, so a
/// backend can pick whichever representation it accepts.
#[derive(Debug, Clone)]
pub struct DirectoryUpload {
    pub files: Vec<ArchiveEntry>,
    pub archive: Bytes,
    /// Hash of `archive`
    pub hash: Hash,
}

/// A storage backend driver.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Fetch the object at `uri`.
    ///
    /// Must return [`StorageError::Cancelled`] promptly once `cancel` fires.
    async fn fetch(&self, uri: &str, cancel: &CancellationToken) -> Result<Bytes, StorageError>;

    /// Upload a buffer and return its locator.
    async fn store(&self, data: Bytes) -> Result<Stored, StorageError>;

    /// Upload a directory tree.
    ///
    /// Returns `Ok(None)` when the backend cannot host directories.
    async fn store_directory(
        &self,
        _dir: &DirectoryUpload,
    ) -> Result<Option<Stored>, StorageError> {
        Ok(None)
    }
}

/// Run a fetch under a deadline and a cancellation token.
///
/// Whichever of the three finishes first wins. On timeout or cancellation the
/// request future is dropped, which aborts the underlying connection.
pub async fn with_deadline<T, F>(
    uri: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    request: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled { uri: uri.to_string() }),
        result = tokio::time::timeout(timeout, request) => match result {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                uri: uri.to_string(),
                after: timeout,
            }),
        },
    }
}
