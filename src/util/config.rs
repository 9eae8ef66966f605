//! Configuration file support for dapplets.
//!
//! Two configuration file locations are read:
//! - Global: `~/.dapplets/config.toml` - User-wide defaults
//! - Project: `.dapplets/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config. Command-line flags
//! and environment variables take precedence over both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::DEFAULT_BRANCH_NAME;
use crate::storage::centralized::{DEFAULT_DOWNLOAD_URL, DEFAULT_UPLOAD_URL};
use crate::storage::driver::FETCH_TIMEOUT;

/// Gateway used when none is configured.
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";

/// Attempts made while waiting for the source registry.
pub const DEFAULT_SOURCE_ATTEMPTS: u32 = 10;

/// Pause between source registry attempts.
pub const DEFAULT_SOURCE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// dapplets configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend endpoints
    pub storage: StorageConfig,

    /// Publish pipeline settings
    pub deploy: DeployConfig,

    /// Network settings
    pub net: NetConfig,
}

/// Storage backend endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// IPFS gateway used for reads and writes
    pub ipfs_gateway: Option<String>,

    /// Read endpoint of the centralized backup
    pub centralized_url: Option<String>,

    /// Upload endpoint of the centralized backup
    pub centralized_upload_url: Option<String>,

    /// Storage server accepting HTTP uploads (`POST /storage`)
    pub http_upload_url: Option<String>,

    /// Per-fetch deadline in seconds
    pub fetch_timeout_secs: Option<u64>,
}

impl StorageConfig {
    pub fn ipfs_gateway(&self) -> &str {
        self.ipfs_gateway.as_deref().unwrap_or(DEFAULT_IPFS_GATEWAY)
    }

    pub fn centralized_url(&self) -> &str {
        self.centralized_url.as_deref().unwrap_or(DEFAULT_DOWNLOAD_URL)
    }

    pub fn centralized_upload_url(&self) -> &str {
        self.centralized_upload_url
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_URL)
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(FETCH_TIMEOUT)
    }
}

/// Publish pipeline settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Branch to publish from
    pub branch: Option<String>,

    /// Attempts made while waiting for the source registry
    pub source_attempts: Option<u32>,

    /// Pause between source registry attempts, in seconds
    pub source_retry_delay_secs: Option<u64>,

    /// Publish to IPFS in addition to the backup
    #[serde(default)]
    pub ipfs: bool,
}

impl DeployConfig {
    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(DEFAULT_BRANCH_NAME)
    }

    pub fn source_attempts(&self) -> u32 {
        self.source_attempts.unwrap_or(DEFAULT_SOURCE_ATTEMPTS)
    }

    pub fn source_retry_delay(&self) -> Duration {
        self.source_retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SOURCE_RETRY_DELAY)
    }
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Accept self-signed certificates (development servers); on by default
    pub accept_invalid_certs: Option<bool>,
}

impl NetConfig {
    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs.unwrap_or(true)
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        // Storage settings
        if other.storage.ipfs_gateway.is_some() {
            self.storage.ipfs_gateway = other.storage.ipfs_gateway;
        }
        if other.storage.centralized_url.is_some() {
            self.storage.centralized_url = other.storage.centralized_url;
        }
        if other.storage.centralized_upload_url.is_some() {
            self.storage.centralized_upload_url = other.storage.centralized_upload_url;
        }
        if other.storage.http_upload_url.is_some() {
            self.storage.http_upload_url = other.storage.http_upload_url;
        }
        if other.storage.fetch_timeout_secs.is_some() {
            self.storage.fetch_timeout_secs = other.storage.fetch_timeout_secs;
        }

        // Deploy settings
        if other.deploy.branch.is_some() {
            self.deploy.branch = other.deploy.branch;
        }
        if other.deploy.source_attempts.is_some() {
            self.deploy.source_attempts = other.deploy.source_attempts;
        }
        if other.deploy.source_retry_delay_secs.is_some() {
            self.deploy.source_retry_delay_secs = other.deploy.source_retry_delay_secs;
        }
        if other.deploy.ipfs {
            self.deploy.ipfs = true;
        }

        // Net settings
        if other.net.accept_invalid_certs.is_some() {
            self.net.accept_invalid_certs = other.net.accept_invalid_certs;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.dapplets/config.toml)
/// 2. Global config (~/.dapplets/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        if global_path.exists() {
            config.merge(Config::load_or_default(global_path));
        }
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global dapplets config directory (~/.dapplets).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".dapplets"))
}

/// Get the global config path (~/.dapplets/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.dapplets/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".dapplets").join("config.toml")
}
