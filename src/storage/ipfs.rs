//! IPFS backend, reached through an HTTP gateway.
//!
//! Reads go to `{gateway}/ipfs/<cid>[/path]`. Writes use the gateway's
//! writable mode: `POST {gateway}/ipfs/` with the raw body, answered with the
//! new CID in an `Ipfs-Hash` header (or, on older gateways, a `Location`
//! header pointing at `/ipfs/<cid>/`).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::core::uri::strip_scheme;
use crate::storage::driver::{
    BackendType, DirectoryUpload, Stored, StorageDriver, FETCH_TIMEOUT,
};
use crate::storage::error::StorageError;
use crate::storage::http::get_bytes;

const SCHEME: &str = "ipfs";
const IPFS_HASH_HEADER: &str = "ipfs-hash";

/// Driver for `ipfs://` locators.
#[derive(Debug, Clone)]
pub struct IpfsStorage {
    client: Client,
    timeout: Duration,
    gateway: String,
}

impl IpfsStorage {
    pub fn new(client: Client, gateway: impl Into<String>) -> Self {
        IpfsStorage {
            client,
            timeout: FETCH_TIMEOUT,
            gateway: gateway.into().trim_end_matches('/').to_string(),
        }
    }

    /// Override the per-fetch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gateway URL serving an `ipfs://` locator.
    pub fn gateway_url(&self, uri: &str) -> Option<String> {
        let rest = strip_scheme(uri, SCHEME)?;
        if rest.is_empty() {
            return None;
        }
        Some(format!("{}/ipfs/{}", self.gateway, rest))
    }

    async fn post(&self, body: Bytes, content_type: &'static str) -> Result<String, StorageError> {
        let endpoint = format!("{}/ipfs/", self.gateway);
        let response = self
            .client
            .post(&endpoint)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|source| StorageError::Request {
                uri: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                uri: endpoint,
                status,
            });
        }

        let cid = cid_from_headers(response.headers()).ok_or_else(|| {
            StorageError::InvalidResponse {
                backend: BackendType::Ipfs,
                message: format!("{} returned no CID", endpoint),
            }
        })?;

        tracing::debug!("Stored {} bytes on IPFS as {}", content_type, cid);
        Ok(format!("{}://{}", SCHEME, cid))
    }
}

/// Extract the CID of a freshly added object from gateway response headers.
fn cid_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(cid) = headers
        .get(IPFS_HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(cid.to_string());
    }

    let location = headers.get(LOCATION)?.to_str().ok()?;
    let rest = strip_scheme(location, SCHEME)
        .or_else(|| location.split_once("/ipfs/").map(|(_, rest)| rest))?;
    rest.split('/')
        .next()
        .filter(|cid| !cid.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl StorageDriver for IpfsStorage {
    async fn fetch(&self, uri: &str, cancel: &CancellationToken) -> Result<Bytes, StorageError> {
        let url = self
            .gateway_url(uri)
            .ok_or_else(|| StorageError::UnsupportedProtocol {
                uri: uri.to_string(),
            })?;

        tracing::debug!("Fetching {} via {}", uri, url);
        get_bytes(&self.client, &url, self.timeout, cancel).await
    }

    async fn store(&self, data: Bytes) -> Result<Stored, StorageError> {
        let uri = self.post(data, "application/octet-stream").await?;
        Ok(Stored::at(uri))
    }

    async fn store_directory(
        &self,
        dir: &DirectoryUpload,
    ) -> Result<Option<Stored>, StorageError> {
        let uri = self.post(dir.archive.clone(), "application/x-tar").await?;
        Ok(Some(Stored::at(uri)))
    }
}
