//! Module registries.
//!
//! A registry persists module and version records. The publish pipeline
//! reads from a source registry (typically the developer's manifest server)
//! and writes to a target registry.

pub mod dev;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::uri::{type_of_uri, UriType};
use crate::core::{ModuleInfo, VersionInfo};

pub use dev::DevRegistry;

/// Receipt of a registry write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction identity
    pub hash: String,
    /// Account that submitted the write
    pub from: String,
}

/// Error talking to a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid JSON at {url}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid manifest at {url}: {message}")]
    Manifest { url: String, message: String },

    #[error("registry {url} is read-only")]
    ReadOnly { url: String },

    #[error("a private key is required to publish to {url}")]
    MissingCredential { url: String },

    #[error("{0}")]
    Unsupported(String),

    /// A failure shared between callers of a single-flight load.
    #[error(transparent)]
    Shared(Arc<RegistryError>),
}

/// A module registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Address of the registry.
    fn url(&self) -> &str;

    /// The module record, or `None` if the registry does not know the module.
    async fn module_info_by_name(&self, name: &str) -> Result<Option<ModuleInfo>, RegistryError>;

    /// Version strings published on `branch`, in registry order.
    async fn version_numbers(&self, name: &str, branch: &str)
        -> Result<Vec<String>, RegistryError>;

    async fn version_info(
        &self,
        name: &str,
        branch: &str,
        version: &str,
    ) -> Result<Option<VersionInfo>, RegistryError>;

    /// Persist a new version.
    async fn add_module(
        &self,
        module: &ModuleInfo,
        version: &VersionInfo,
    ) -> Result<TxReceipt, RegistryError>;
}

/// Where a registry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub url: String,
    /// Served by a development manifest server
    pub is_dev: bool,
}

impl RegistryConfig {
    pub fn dev(url: impl Into<String>) -> Self {
        RegistryConfig {
            url: url.into(),
            is_dev: true,
        }
    }

    pub fn ledger(url: impl Into<String>) -> Self {
        RegistryConfig {
            url: url.into(),
            is_dev: false,
        }
    }
}

/// Open the registry described by `config`.
///
/// Development registries are HTTP manifest servers. Anything else is a
/// ledger registry addressed by contract address or ENS name; writes to it
/// need `credential`. No ledger client is built into this crate, so those
/// are reported as unsupported once the address checks out.
pub fn open(
    config: &RegistryConfig,
    credential: Option<&str>,
    client: Client,
) -> Result<Box<dyn Registry>, RegistryError> {
    let kind = type_of_uri(&config.url);

    if config.is_dev {
        if kind != UriType::Http {
            return Err(RegistryError::Unsupported(format!(
                "development registry `{}` must be an HTTP URL",
                config.url
            )));
        }
        return Ok(Box::new(DevRegistry::new(&config.url, client)?));
    }

    match kind {
        UriType::Ethereum | UriType::Ens => {
            if credential.map_or(true, str::is_empty) {
                return Err(RegistryError::MissingCredential {
                    url: config.url.clone(),
                });
            }
            Err(RegistryError::Unsupported(format!(
                "no ledger client available for registry {}",
                config.url
            )))
        }
        UriType::Http | UriType::Ipfs | UriType::Unknown => Err(RegistryError::Unsupported(
            format!("`{}` is not a registry address", config.url),
        )),
    }
}
