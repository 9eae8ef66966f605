//! Storage error types.

use std::fmt::Write as _;
use std::time::Duration;

use thiserror::Error;

use crate::storage::driver::BackendType;
use crate::util::archive::ArchiveError;
use crate::util::hash::Hash;

/// Error from a backend driver or the storage aggregator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request to {uri} failed")]
    Request {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{uri} responded with HTTP {status}")]
    Status {
        uri: String,
        status: reqwest::StatusCode,
    },

    #[error("fetching {uri} timed out after {}s", .after.as_secs())]
    Timeout { uri: String, after: Duration },

    #[error("fetching {uri} was cancelled")]
    Cancelled { uri: String },

    #[error("hash mismatch for {uri}: expected {expected}, received {actual}")]
    HashMismatch {
        uri: String,
        expected: Hash,
        actual: Hash,
    },

    #[error("unsupported protocol in `{uri}`")]
    UnsupportedProtocol { uri: String },

    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: BackendType,
        operation: &'static str,
    },

    #[error("{backend} backend rejected the upload: {message}")]
    Rejected {
        backend: BackendType,
        message: String,
    },

    #[error("invalid response from {backend} backend: {message}")]
    InvalidResponse {
        backend: BackendType,
        message: String,
    },

    #[error("invalid storage endpoint `{endpoint}`")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot fetch resource {}{}", describe_resource(.uris, .hash), list_errors(.errors))]
    ResourceUnavailable {
        uris: Vec<String>,
        hash: Option<Hash>,
        errors: Vec<StorageError>,
    },

    #[error("upload failed{}", list_failures(.failures))]
    UploadFailed {
        failures: Vec<(BackendType, StorageError)>,
    },

    #[error("backup is corrupted: local hash {expected}, backup reported `{reported}`")]
    BackupCorrupted { expected: Hash, reported: String },

    #[error("failed to package directory")]
    Archive(#[from] ArchiveError),
}

impl StorageError {
    /// Whether this error came from a cancelled attempt rather than a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled { .. })
    }
}

fn describe_resource(uris: &[String], hash: &Option<Hash>) -> String {
    let mut out = String::new();
    if uris.is_empty() {
        out.push_str("(no URIs)");
    } else {
        out.push_str(&uris.join(", "));
    }
    if let Some(hash) = hash {
        let _ = write!(out, " (hash {})", hash);
    }
    out
}

/// Render collected attempt errors including their cause chains.
fn list_errors(errors: &[StorageError]) -> String {
    let mut out = String::new();
    for error in errors {
        let _ = write!(out, "\n  - {}", render_chain(error));
    }
    out
}

fn list_failures(failures: &[(BackendType, StorageError)]) -> String {
    let mut out = String::new();
    for (backend, error) in failures {
        let _ = write!(out, "\n  - {}: {}", backend, render_chain(error));
    }
    out
}

fn render_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(out, ": {}", cause);
        source = cause.source();
    }
    out
}
