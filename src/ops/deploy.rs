//! The publish pipeline.
//!
//! Reads a module from a source registry, republishes every resource it
//! references to content-addressed storage, and registers the result in a
//! target registry.

use std::time::Duration;

use bytes::Bytes;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::core::{ModuleInfo, VersionInfo, DEFAULT_BRANCH_NAME};
use crate::ops::bundle::main_entries;
use crate::ops::error::DeployError;
use crate::ops::overlay::{manifest_entry, publish_overlays};
use crate::ops::validate::{check_version_gate, latest_version, validate_icon, validate_module_name};
use crate::registry::Registry;
use crate::storage::{BackendType, StorageAggregator};
use crate::util::archive::{pack_zip, MAX_COMPRESSION};
use crate::util::config::{DEFAULT_SOURCE_ATTEMPTS, DEFAULT_SOURCE_RETRY_DELAY};

/// Options for [`deploy_module`].
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub module_name: String,
    pub branch: String,
    /// Backends to publish to, in addition to the centralized backup
    pub targets: Vec<BackendType>,
    /// Lookups of the source registry before giving up
    pub source_attempts: u32,
    pub retry_delay: Duration,
}

impl DeployOptions {
    pub fn new(module_name: impl Into<String>) -> Self {
        DeployOptions {
            module_name: module_name.into(),
            branch: DEFAULT_BRANCH_NAME.to_string(),
            targets: Vec::new(),
            source_attempts: DEFAULT_SOURCE_ATTEMPTS,
            retry_delay: DEFAULT_SOURCE_RETRY_DELAY,
        }
    }
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedModule {
    /// First locator of the published distributable
    pub script_url: Option<String>,
    pub tx_hash: String,
    pub sender: String,
    pub version: String,
}

/// Publish the latest version of a module from `source` into `target`.
///
/// Nothing is registered unless every step succeeds. Uploads already made
/// when a later step fails are left in storage.
pub async fn deploy_module(
    storage: &StorageAggregator,
    source: &dyn Registry,
    target: &dyn Registry,
    opts: &DeployOptions,
) -> Result<DeployedModule, DeployError> {
    let name = opts.module_name.as_str();
    let branch = opts.branch.as_str();

    let mut module = await_source(source, opts).await?;
    let mut version = resolve_source_version(source, name, branch).await?;
    let candidate = Version::parse(&version.version).map_err(|e| DeployError::InvalidVersion {
        version: version.version.clone(),
        source: e,
    })?;
    tracing::info!("Found {} in {}", version.id(), source.url());

    gate_against_target(target, name, branch, &candidate).await?;

    validate_module_name(&module.name)?;
    if let Some(icon) = &module.icon {
        validate_icon(icon)?;
    }

    let script_url = publish_artifact(storage, &mut version, &opts.targets).await?;

    if let Some(metadata) = module.metadata.as_ref().filter(|m| !m.uris.is_empty()) {
        tracing::info!("Publishing metadata image");
        let data = storage.get_resource(metadata).await?;
        module.metadata = Some(storage.save(data, &opts.targets).await?);
    }

    tracing::info!("Registering {} in {}", version.id(), target.url());
    let receipt = target.add_module(&module, &version).await?;

    Ok(DeployedModule {
        script_url,
        tx_hash: receipt.hash,
        sender: receipt.from,
        version: version.version,
    })
}

/// Poll the source registry until it answers for the module.
async fn await_source(source: &dyn Registry, opts: &DeployOptions) -> Result<ModuleInfo, DeployError> {
    let attempts = opts.source_attempts.max(1);
    let mut remaining = attempts;

    loop {
        match source.module_info_by_name(&opts.module_name).await {
            Ok(Some(module)) => return Ok(module),
            Ok(None) => {
                return Err(DeployError::ModuleNotFound {
                    name: opts.module_name.clone(),
                    branch: None,
                    registry: source.url().to_string(),
                })
            }
            Err(err) => {
                remaining -= 1;
                if remaining == 0 {
                    return Err(DeployError::SourceUnavailable {
                        url: source.url().to_string(),
                        attempts,
                        source: err,
                    });
                }
                tracing::warn!(
                    "{} is not responding ({}). Attempts left: {}",
                    source.url(),
                    err,
                    remaining
                );
                tokio::time::sleep(opts.retry_delay).await;
            }
        }
    }
}

async fn resolve_source_version(
    source: &dyn Registry,
    name: &str,
    branch: &str,
) -> Result<VersionInfo, DeployError> {
    let versions = source.version_numbers(name, branch).await?;
    let Some((latest, _)) = latest_version(&versions)? else {
        return Err(DeployError::ModuleNotFound {
            name: name.to_string(),
            branch: Some(branch.to_string()),
            registry: source.url().to_string(),
        });
    };

    source
        .version_info(name, branch, latest)
        .await?
        .ok_or_else(|| DeployError::VersionNotFound {
            name: name.to_string(),
            branch: branch.to_string(),
            version: latest.to_string(),
            registry: source.url().to_string(),
        })
}

/// The target must already know the module, and hold only older versions.
async fn gate_against_target(
    target: &dyn Registry,
    name: &str,
    branch: &str,
    candidate: &Version,
) -> Result<(), DeployError> {
    if target.module_info_by_name(name).await?.is_none() {
        return Err(DeployError::FirstPublishNotAllowed {
            name: name.to_string(),
            registry: target.url().to_string(),
        });
    }

    let published = target.version_numbers(name, branch).await?;
    let latest = latest_version(&published)?;
    check_version_gate(
        name,
        candidate,
        latest.as_ref().map(|(_, v)| v),
        target.url(),
    )
}

/// Build the distributable, publish it and record it as `dist`.
///
/// Overlays are published first so the distributable can list them.
async fn publish_artifact(
    storage: &StorageAggregator,
    version: &mut VersionInfo,
    targets: &[BackendType],
) -> Result<Option<String>, DeployError> {
    let mut entries = main_entries(storage, version).await?;

    if let Some(overlays) = version.overlays.as_mut() {
        publish_overlays(storage, overlays, targets).await?;
        entries.push(manifest_entry(overlays)?);
    }

    if version.main.is_none() {
        tracing::debug!("{} has no main bundle; skipping the distributable", version.id());
        return Ok(None);
    }

    let archive = Bytes::from(pack_zip(&entries, MAX_COMPRESSION)?);
    tracing::info!("Uploading distributable ({} bytes)", archive.len());
    let dist = storage.save(archive, targets).await?;
    let script_url = dist.primary_uri().map(str::to_string);
    version.dist = Some(dist);

    Ok(script_url)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::core::{ModuleType, ResourceRef};
    use crate::test_support::{MemoryStorage, MockRegistry};
    use crate::util::archive::unpack_zip;

    const DEV: &str = "https://localhost:3001/dapplet.json";
    const TARGET: &str = "dapplet-base.eth";

    struct Fixture {
        http: Arc<MemoryStorage>,
        ipfs: Arc<MemoryStorage>,
        storage: StorageAggregator,
    }

    fn fixture() -> Fixture {
        let http = Arc::new(MemoryStorage::new(BackendType::Http));
        let ipfs = Arc::new(MemoryStorage::new(BackendType::Ipfs).with_directories());
        let storage = StorageAggregator::with_drivers(
            http.clone(),
            ipfs.clone(),
            Arc::new(MemoryStorage::new(BackendType::Centralized).with_directories()),
        );
        http.insert("https://localhost:3001/index.js", "export default {}");
        Fixture {
            http,
            ipfs,
            storage,
        }
    }

    fn widget() -> ModuleInfo {
        ModuleInfo::new("widget", ModuleType::Feature)
    }

    fn widget_version(version: &str) -> VersionInfo {
        let mut vi = VersionInfo::new("widget", "default", version, ModuleType::Feature);
        vi.main = Some(ResourceRef::from_uri("https://localhost:3001/index.js"));
        vi
    }

    fn options() -> DeployOptions {
        let mut opts = DeployOptions::new("widget");
        opts.targets = vec![BackendType::Ipfs];
        opts
    }

    fn target_with(versions: &[&str]) -> MockRegistry {
        versions.iter().fold(
            MockRegistry::new(TARGET).with_module(widget()),
            |registry, v| registry.with_version(widget_version(v)),
        )
    }

    #[tokio::test]
    async fn test_deploy_end_to_end() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("2.0.0"));
        let target = target_with(&["1.0.0"]);

        let deployed = deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap();

        assert_eq!(deployed.version, "2.0.0");
        assert_eq!(deployed.tx_hash, format!("0x{:064x}", 1));
        assert_eq!(deployed.sender, "0x00000000000000000000000000000000000000aa");

        let added = target.added();
        assert_eq!(added.len(), 1);
        let (_, vi) = &added[0];
        assert_eq!(vi.version, "2.0.0");

        let dist = vi.dist.as_ref().unwrap();
        assert!(dist.hash.is_some());
        assert_eq!(deployed.script_url.as_deref(), dist.primary_uri());

        let zip = fx.ipfs.get(&dist.uris[0]).unwrap();
        assert!(dist.verify(&zip));
        let files = unpack_zip(&zip).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["index.js"]);
        assert_eq!(&files[0].data[..], b"export default {}");
    }

    #[tokio::test]
    async fn test_version_not_newer() {
        for published in ["2.0.0", "2.1.0"] {
            let fx = fixture();
            let source = MockRegistry::new(DEV)
                .with_module(widget())
                .with_version(widget_version("2.0.0"));
            let target = target_with(&[published]);

            let err = deploy_module(&fx.storage, &source, &target, &options())
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::VersionNotNewer { .. }), "{err}");
            assert!(target.added().is_empty());
            assert_eq!(fx.ipfs.stored_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_first_publish_not_allowed() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("1.0.0"));
        let target = MockRegistry::new(TARGET);

        let err = deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::FirstPublishNotAllowed { .. }));
    }

    #[tokio::test]
    async fn test_module_without_versions_on_branch() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("1.0.0"));
        let target = target_with(&[]);

        let mut opts = options();
        opts.branch = "beta".to_string();
        let err = deploy_module(&fx.storage, &source, &target, &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::ModuleNotFound { branch: Some(ref b), .. } if b == "beta"
        ));
    }

    #[tokio::test]
    async fn test_first_version_on_target_branch_proceeds() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("0.1.0"));
        let target = target_with(&[]);

        let deployed = deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap();
        assert_eq!(deployed.version, "0.1.0");
    }

    #[tokio::test]
    async fn test_versions_sorted_client_side() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("1.9.0"))
            .with_version(widget_version("1.10.0"));
        let target = target_with(&["1.2.0", "1.9.5"]);

        let deployed = deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap();
        assert_eq!(deployed.version, "1.10.0");

        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("1.9.0"));
        let target = target_with(&["1.10.0", "1.2.0"]);
        let err = deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::VersionNotNewer { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_source() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .with_version(widget_version("2.0.0"))
            .unavailable_for(3);
        let target = target_with(&["1.0.0"]);

        let started = tokio::time::Instant::now();
        deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap();

        assert_eq!(source.lookups(), 4);
        assert!(started.elapsed() >= DEFAULT_SOURCE_RETRY_DELAY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_unavailable() {
        let fx = fixture();
        let source = MockRegistry::new(DEV)
            .with_module(widget())
            .unavailable_for(100);
        let target = target_with(&["1.0.0"]);

        let mut opts = options();
        opts.source_attempts = 3;
        let err = deploy_module(&fx.storage, &source, &target, &opts)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::SourceUnavailable { attempts: 3, .. }));
        assert_eq!(source.lookups(), 3);
    }

    #[tokio::test]
    async fn test_invalid_icon_stops_before_upload() {
        let fx = fixture();
        let mut module = widget();
        module.icon = Some(ResourceRef::from_uri("https://localhost:3001/icon.svg"));
        let source = MockRegistry::new(DEV)
            .with_module(module)
            .with_version(widget_version("2.0.0"));
        let target = target_with(&["1.0.0"]);

        let err = deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidAsset { .. }));
        assert_eq!(fx.ipfs.stored_count(), 0);
        assert!(target.added().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_and_overlays_are_republished() {
        let fx = fixture();
        fx.http.insert("https://localhost:3001/metadata.png", "png-bytes");
        fx.http.insert(
            "http://localhost:3000/assets-manifest.json",
            r#"{"index.html": "index.html"}"#,
        );
        fx.http.insert("http://localhost:3000/index.html", "<html></html>");

        let mut module = widget();
        module.metadata = Some(ResourceRef::from_uri("https://localhost:3001/metadata.png"));
        let mut version = widget_version("2.0.0");
        let mut overlays = BTreeMap::new();
        overlays.insert("popup".to_string(), ResourceRef::from_uri("http://localhost:3000/"));
        version.overlays = Some(overlays);

        let source = MockRegistry::new(DEV)
            .with_module(module)
            .with_version(version);
        let target = target_with(&["1.0.0"]);

        deploy_module(&fx.storage, &source, &target, &options())
            .await
            .unwrap();

        let (mi, vi) = &target.added()[0];
        let metadata = mi.metadata.as_ref().unwrap();
        assert!(metadata.hash.is_some());
        assert_eq!(
            fx.ipfs.get(&metadata.uris[0]).as_deref(),
            Some(&b"png-bytes"[..])
        );

        let popup = &vi.overlays.as_ref().unwrap()["popup"];
        assert!(popup.uris[0].starts_with("ipfs://"));

        let zip = fx.ipfs.get(&vi.dist.as_ref().unwrap().uris[0]).unwrap();
        let files = unpack_zip(&zip).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["index.js", "dapplet.json"]);

        let listed: serde_json::Value = serde_json::from_slice(&files[1].data).unwrap();
        assert_eq!(listed["overlays"]["popup"]["uris"][0], popup.uris[0]);
    }
}
