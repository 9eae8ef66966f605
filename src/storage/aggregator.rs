//! Storage aggregator - resolves resources across backends and publishes to them.
//!
//! Resolution races every applicable driver and returns the first verified
//! buffer. Publishing fans out to every requested backend plus the
//! centralized backup and waits for all of them, then cross-checks the
//! backup's hash against the locally computed one.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::core::resource::{ResourceRef, StorageRef};
use crate::storage::centralized::CentralizedStorage;
use crate::storage::driver::{BackendType, DirectoryUpload, Stored, StorageDriver};
use crate::storage::error::StorageError;
use crate::storage::http::HttpStorage;
use crate::storage::ipfs::IpfsStorage;
use crate::util::archive::{pack_tar, ArchiveEntry};
use crate::util::config::StorageConfig;
use crate::util::hash::{self, digest, Hash};

/// The storage fabric for one pipeline run.
#[derive(Clone)]
pub struct StorageAggregator {
    http: Arc<dyn StorageDriver>,
    ipfs: Arc<dyn StorageDriver>,
    centralized: Arc<dyn StorageDriver>,
}

impl std::fmt::Debug for StorageAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAggregator").finish_non_exhaustive()
    }
}

impl StorageAggregator {
    /// Build the network drivers from configuration, sharing one HTTP client.
    pub fn from_config(config: &StorageConfig, client: Client) -> Result<Self, StorageError> {
        let timeout = config.fetch_timeout();

        let mut http = HttpStorage::new(client.clone()).with_timeout(timeout);
        if let Some(upload_url) = &config.http_upload_url {
            check_endpoint(upload_url)?;
            http = http.with_upload_url(upload_url.as_str());
        }

        check_endpoint(config.ipfs_gateway())?;
        let ipfs = IpfsStorage::new(client.clone(), config.ipfs_gateway()).with_timeout(timeout);

        check_endpoint(config.centralized_url())?;
        check_endpoint(config.centralized_upload_url())?;
        let centralized = CentralizedStorage::new(
            client,
            config.centralized_url(),
            config.centralized_upload_url(),
        )
        .with_timeout(timeout);

        Ok(Self::with_drivers(
            Arc::new(http),
            Arc::new(ipfs),
            Arc::new(centralized),
        ))
    }

    pub fn with_drivers(
        http: Arc<dyn StorageDriver>,
        ipfs: Arc<dyn StorageDriver>,
        centralized: Arc<dyn StorageDriver>,
    ) -> Self {
        StorageAggregator {
            http,
            ipfs,
            centralized,
        }
    }

    /// The driver for a backend.
    pub fn driver(&self, backend: BackendType) -> &dyn StorageDriver {
        match backend {
            BackendType::Http => self.http.as_ref(),
            BackendType::Ipfs => self.ipfs.as_ref(),
            BackendType::Centralized => self.centralized.as_ref(),
        }
    }

    /// Fetch a resource, racing every candidate locator plus the backup.
    ///
    /// Returns the first buffer that passes hash verification; the remaining
    /// attempts are cancelled. Fails with [`StorageError::ResourceUnavailable`]
    /// carrying every attempt's error when nothing succeeds.
    pub async fn get_resource(&self, resource: &ResourceRef) -> Result<Bytes, StorageError> {
        let expected = resource.hash.as_ref();
        let backup_key = resource.hash.map(|h| h.to_hex());
        let cancel = CancellationToken::new();
        let mut errors = Vec::new();

        let mut attempts = FuturesUnordered::new();
        for uri in &resource.uris {
            match BackendType::for_uri(uri) {
                Some(backend) => attempts.push(fetch_verified(
                    self.driver(backend),
                    uri,
                    expected,
                    &cancel,
                )),
                None => errors.push(StorageError::UnsupportedProtocol { uri: uri.clone() }),
            }
        }
        if let Some(key) = &backup_key {
            attempts.push(fetch_verified(
                self.centralized.as_ref(),
                key,
                expected,
                &cancel,
            ));
        }

        while let Some(result) = attempts.next().await {
            match result {
                Ok(data) => {
                    cancel.cancel();
                    return Ok(data);
                }
                Err(err) => {
                    tracing::warn!("{}", err);
                    errors.push(err);
                }
            }
        }

        Err(StorageError::ResourceUnavailable {
            uris: resource.uris.clone(),
            hash: resource.hash,
            errors,
        })
    }

    /// Upload a buffer to `targets` and to the backup.
    ///
    /// The returned reference holds one locator per target, in target order.
    pub async fn save(
        &self,
        data: Bytes,
        targets: &[BackendType],
    ) -> Result<StorageRef, StorageError> {
        let hash = digest(&data);
        let targets = dedup(targets);
        tracing::debug!("Uploading {} bytes ({}) to {:?}", data.len(), hash, targets);

        let uploads = targets
            .iter()
            .filter(|&&backend| backend != BackendType::Centralized)
            .map(|&backend| {
                let data = data.clone();
                async move { (backend, self.driver(backend).store(data).await.map(Some)) }
            });

        let (results, backup) = tokio::join!(
            join_all(uploads),
            self.centralized.store(data.clone())
        );

        finish_upload(hash, &targets, results, backup.map(Some))
    }

    /// Pack `files` into a tar archive and upload it to every target that can
    /// host directories, plus the backup.
    ///
    /// Targets without directory support are skipped, so the returned
    /// reference may list fewer locators than there are targets.
    pub async fn save_directory(
        &self,
        files: Vec<ArchiveEntry>,
        targets: &[BackendType],
    ) -> Result<StorageRef, StorageError> {
        let archive = Bytes::from(pack_tar(&files)?);
        let dir = DirectoryUpload {
            hash: digest(&archive),
            archive,
            files,
        };
        let targets = dedup(targets);
        tracing::debug!(
            "Uploading directory of {} files ({}) to {:?}",
            dir.files.len(),
            dir.hash,
            targets
        );

        let uploads = targets
            .iter()
            .filter(|&&backend| backend != BackendType::Centralized)
            .map(|&backend| {
                let dir = &dir;
                async move { (backend, self.driver(backend).store_directory(dir).await) }
            });

        let (results, backup) = tokio::join!(
            join_all(uploads),
            self.centralized.store_directory(&dir)
        );

        finish_upload(dir.hash, &targets, results, backup)
    }
}

async fn fetch_verified(
    driver: &dyn StorageDriver,
    uri: &str,
    expected: Option<&Hash>,
    cancel: &CancellationToken,
) -> Result<Bytes, StorageError> {
    let data = driver.fetch(uri, cancel).await?;
    match expected {
        Some(expected) if !hash::verify(&data, Some(expected)) => Err(StorageError::HashMismatch {
            uri: uri.to_string(),
            expected: *expected,
            actual: digest(&data),
        }),
        _ => Ok(data),
    }
}

/// Check the backup against `hash`, collect failures, and assemble the
/// returned reference.
fn finish_upload(
    hash: Hash,
    targets: &[BackendType],
    results: Vec<(BackendType, Result<Option<Stored>, StorageError>)>,
    backup: Result<Option<Stored>, StorageError>,
) -> Result<StorageRef, StorageError> {
    let mut failures = Vec::new();

    let backup = match backup {
        Ok(Some(stored)) => {
            check_backup(hash, &stored)?;
            Some(stored)
        }
        Ok(None) => {
            failures.push((
                BackendType::Centralized,
                StorageError::Unsupported {
                    backend: BackendType::Centralized,
                    operation: "directory uploads",
                },
            ));
            None
        }
        Err(err) => {
            failures.push((BackendType::Centralized, err));
            None
        }
    };

    let mut stored = Vec::new();
    for (backend, result) in results {
        match result {
            Ok(Some(s)) => stored.push((backend, s)),
            Ok(None) => tracing::debug!("{} backend cannot host directories; skipped", backend),
            Err(err) => failures.push((backend, err)),
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|(backend, _)| *backend);
        return Err(StorageError::UploadFailed { failures });
    }

    let uris = targets
        .iter()
        .filter_map(|&target| match target {
            BackendType::Centralized => backup.as_ref().map(|b| b.uri.clone()),
            _ => stored
                .iter()
                .find(|(backend, _)| *backend == target)
                .map(|(_, s)| s.uri.clone()),
        })
        .collect();

    Ok(StorageRef::new(hash, uris))
}

fn check_backup(hash: Hash, backup: &Stored) -> Result<(), StorageError> {
    let Some(reported) = &backup.reported_hash else {
        return Err(StorageError::BackupCorrupted {
            expected: hash,
            reported: "<none>".to_string(),
        });
    };

    match reported.parse::<Hash>() {
        Ok(reported) if reported == hash => Ok(()),
        _ => Err(StorageError::BackupCorrupted {
            expected: hash,
            reported: reported.clone(),
        }),
    }
}

fn dedup(targets: &[BackendType]) -> Vec<BackendType> {
    let mut out = Vec::with_capacity(targets.len());
    for &target in targets {
        if !out.contains(&target) {
            out.push(target);
        }
    }
    out
}

fn check_endpoint(endpoint: &str) -> Result<(), StorageError> {
    url::Url::parse(endpoint)
        .map(|_| ())
        .map_err(|source| StorageError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })
}
