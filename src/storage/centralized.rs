//! Centralized backup backend.
//!
//! The backup indexes content by its Keccak-256 hash: objects are read from
//! `{download_url}/{hex}` and written with a multipart POST whose response
//! carries the hash the service computed. That reported hash feeds the
//! backup-consistency check in the aggregator.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::storage::driver::{
    BackendType, DirectoryUpload, Stored, StorageDriver, FETCH_TIMEOUT,
};
use crate::storage::error::StorageError;
use crate::storage::http::{file_form, get_bytes, post_form};

/// Public read endpoint of the backup bucket.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://dapplet-api.s3.nl-ams.scw.cloud";

/// Upload endpoint of the backup service.
pub const DEFAULT_UPLOAD_URL: &str = "https://api.dapplets.org/api/storage/";

#[derive(Debug, Clone)]
pub struct CentralizedStorage {
    client: Client,
    timeout: Duration,
    download_url: String,
    upload_url: String,
}

impl CentralizedStorage {
    pub fn new(
        client: Client,
        download_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        CentralizedStorage {
            client,
            timeout: FETCH_TIMEOUT,
            download_url: download_url.into().trim_end_matches('/').to_string(),
            upload_url: upload_url.into(),
        }
    }

    /// Override the per-fetch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read locator for an object with the given hash.
    pub fn object_url(&self, hash: &str) -> String {
        let hex = hash
            .strip_prefix("0x")
            .or_else(|| hash.strip_prefix("0X"))
            .unwrap_or(hash);
        format!("{}/{}", self.download_url, hex.to_ascii_lowercase())
    }

    async fn upload(&self, data: Bytes, file_name: &'static str, mime: &str) -> Result<Stored, StorageError> {
        let form = file_form(data, file_name, mime)?;
        let reported = post_form(&self.client, &self.upload_url, form, BackendType::Centralized).await?;

        tracing::debug!("Backup reported hash {}", reported);
        Ok(Stored {
            uri: self.object_url(&reported),
            reported_hash: Some(reported),
        })
    }
}

#[async_trait]
impl StorageDriver for CentralizedStorage {
    /// `uri` is the content hash, with or without a `0x` prefix.
    async fn fetch(&self, uri: &str, cancel: &CancellationToken) -> Result<Bytes, StorageError> {
        let url = self.object_url(uri);
        tracing::debug!("Fetching {} from backup", url);
        get_bytes(&self.client, &url, self.timeout, cancel).await
    }

    async fn store(&self, data: Bytes) -> Result<Stored, StorageError> {
        self.upload(data, "blob", "application/octet-stream").await
    }

    async fn store_directory(
        &self,
        dir: &DirectoryUpload,
    ) -> Result<Option<Stored>, StorageError> {
        self.upload(dir.archive.clone(), "dir.tar", "application/x-tar")
            .await
            .map(Some)
    }
}
