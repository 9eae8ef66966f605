//! Plain HTTP(S) backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::storage::driver::{with_deadline, BackendType, Stored, StorageDriver, FETCH_TIMEOUT};
use crate::storage::error::StorageError;

/// Body returned by storage upload endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl UploadResponse {
    /// The `data` field of a successful response.
    pub(crate) fn into_data(self, backend: BackendType) -> Result<String, StorageError> {
        if !self.success {
            return Err(StorageError::Rejected {
                backend,
                message: self
                    .message
                    .unwrap_or_else(|| "upload was not accepted".to_string()),
            });
        }

        self.data.ok_or_else(|| StorageError::InvalidResponse {
            backend,
            message: "missing `data` in upload response".to_string(),
        })
    }
}

/// GET `url` and return the body, failing on any non-2xx status.
pub(crate) async fn get_bytes(
    client: &Client,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes, StorageError> {
    let request = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|source| StorageError::Request {
                uri: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                uri: url.to_string(),
                status,
            });
        }

        response.bytes().await.map_err(|source| StorageError::Request {
            uri: url.to_string(),
            source,
        })
    };

    with_deadline(url, timeout, cancel, request).await
}

/// POST `form` to `url` and decode the upload response body.
pub(crate) async fn post_form(
    client: &Client,
    url: &str,
    form: Form,
    backend: BackendType,
) -> Result<String, StorageError> {
    let response = client
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|source| StorageError::Request {
            uri: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(StorageError::Status {
            uri: url.to_string(),
            status,
        });
    }

    let body: UploadResponse = response.json().await.map_err(|source| StorageError::Request {
        uri: url.to_string(),
        source,
    })?;

    body.into_data(backend)
}

/// Form with a single `file` field holding `data`.
pub(crate) fn file_form(data: Bytes, file_name: &'static str, mime: &str) -> Result<Form, StorageError> {
    let part = Part::bytes(data.to_vec())
        .file_name(file_name)
        .mime_str(mime)
        .map_err(|source| StorageError::Request {
            uri: format!("{} ({})", file_name, mime),
            source,
        })?;
    Ok(Form::new().part("file", part))
}

/// Driver for `http://` and `https://` locators.
///
/// Fetching works for any URL. Uploading needs a storage server
/// (`upload_url`) exposing `POST /storage`; without one, `store` reports
/// the operation as unsupported.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    timeout: Duration,
    upload_url: Option<String>,
}

impl HttpStorage {
    pub fn new(client: Client) -> Self {
        HttpStorage {
            client,
            timeout: FETCH_TIMEOUT,
            upload_url: None,
        }
    }

    /// Enable uploads to a storage server.
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    /// Override the per-fetch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StorageDriver for HttpStorage {
    async fn fetch(&self, uri: &str, cancel: &CancellationToken) -> Result<Bytes, StorageError> {
        if BackendType::for_uri(uri) != Some(BackendType::Http) {
            return Err(StorageError::UnsupportedProtocol {
                uri: uri.to_string(),
            });
        }

        tracing::debug!("Fetching {} over HTTP", uri);
        get_bytes(&self.client, uri, self.timeout, cancel).await
    }

    async fn store(&self, data: Bytes) -> Result<Stored, StorageError> {
        let Some(upload_url) = &self.upload_url else {
            return Err(StorageError::Unsupported {
                backend: BackendType::Http,
                operation: "uploads without a storage server URL",
            });
        };

        let endpoint = format!("{}/storage", upload_url);
        let form = file_form(data, "blob", "application/octet-stream")?;
        let id = post_form(&self.client, &endpoint, form, BackendType::Http).await?;

        Ok(Stored::at(format!("{}/{}", endpoint, id)))
    }
}
