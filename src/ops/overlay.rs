//! Overlay publishing.
//!
//! An overlay is a built web bundle served from a base URL. Its
//! `assets-manifest.json` maps output names to the files the build emitted;
//! every listed file is fetched and the set is published as one directory.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use serde_json::{Map, Value};

use crate::core::{join_url, ResourceRef};
use crate::ops::error::DeployError;
use crate::storage::{BackendType, StorageAggregator};
use crate::util::archive::{normalize_path, ArchiveEntry};

pub const ASSETS_MANIFEST: &str = "assets-manifest.json";

/// The file every overlay must ship.
pub const ENTRY_POINT: &str = "index.html";

/// Manifest file embedded in the distributable when a version has overlays.
pub const OVERLAY_MANIFEST: &str = "dapplet.json";

/// Publish every overlay and replace its reference with the stored directory.
pub async fn publish_overlays(
    storage: &StorageAggregator,
    overlays: &mut BTreeMap<String, ResourceRef>,
    targets: &[BackendType],
) -> Result<(), DeployError> {
    for (name, overlay) in overlays.iter_mut() {
        tracing::info!("Publishing overlay `{}`", name);
        *overlay = publish_overlay(storage, name, overlay, targets).await?;
    }
    Ok(())
}

async fn publish_overlay(
    storage: &StorageAggregator,
    name: &str,
    overlay: &ResourceRef,
    targets: &[BackendType],
) -> Result<ResourceRef, DeployError> {
    let base = overlay.primary_uri().ok_or_else(|| DeployError::InvalidAsset {
        asset: format!("overlay `{}`", name),
        reason: "no base URL".to_string(),
    })?;
    let manifest_url = join_url(base, ASSETS_MANIFEST).map_err(|source| DeployError::InvalidUrl {
        url: base.to_string(),
        source,
    })?;

    let raw = storage
        .get_resource(&ResourceRef::from_uri(manifest_url.clone()))
        .await
        .map_err(|source| DeployError::AssetsManifestUnavailable {
            overlay: name.to_string(),
            url: manifest_url.clone(),
            source,
        })?;
    let manifest = parse_manifest(name, &manifest_url, &raw)?;
    let assets = asset_paths(name, &manifest_url, &manifest)?;

    let files = try_join_all(assets.into_iter().map(|path| async move {
        let url = join_url(base, &path).map_err(|source| DeployError::InvalidUrl {
            url: path.clone(),
            source,
        })?;
        tracing::debug!("Fetching overlay asset {}", url);
        let data = storage.get_resource(&ResourceRef::from_uri(url)).await?;
        Ok::<_, DeployError>(ArchiveEntry::new(path, data))
    }))
    .await?;

    tracing::info!("Uploading overlay `{}` ({} files)", name, files.len());
    let stored = storage.save_directory(files, targets).await?;
    Ok(stored)
}

fn parse_manifest(
    overlay: &str,
    url: &str,
    raw: &[u8],
) -> Result<Map<String, Value>, DeployError> {
    let invalid = |reason: &str| DeployError::ManifestInvalid {
        overlay: overlay.to_string(),
        url: url.to_string(),
        reason: reason.to_string(),
    };

    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(invalid("must be a JSON object")),
        Err(_) => Err(invalid("is not valid JSON")),
    }
}

/// Archive paths of the assets a manifest lists, deduplicated, in key order.
fn asset_paths(
    overlay: &str,
    url: &str,
    manifest: &Map<String, Value>,
) -> Result<Vec<String>, DeployError> {
    let mut paths: Vec<String> = Vec::new();

    for (key, value) in manifest {
        let Value::String(source) = value else {
            return Err(DeployError::ManifestInvalid {
                overlay: overlay.to_string(),
                url: url.to_string(),
                reason: format!("maps `{}` to a non-string value", key),
            });
        };
        let path = normalize_path(source).map_err(|_| DeployError::ManifestInvalid {
            overlay: overlay.to_string(),
            url: url.to_string(),
            reason: format!("lists an invalid path `{}`", source),
        })?;
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    if !paths.iter().any(|p| p == ENTRY_POINT) {
        return Err(DeployError::ManifestMissingEntry {
            overlay: overlay.to_string(),
            url: url.to_string(),
        });
    }

    Ok(paths)
}

/// `dapplet.json` listing the published overlay references.
pub fn manifest_entry(
    overlays: &BTreeMap<String, ResourceRef>,
) -> Result<ArchiveEntry, DeployError> {
    let manifest = serde_json::json!({ "overlays": overlays });
    let data = serde_json::to_vec(&manifest).map_err(|e| DeployError::InvalidAsset {
        asset: OVERLAY_MANIFEST.to_string(),
        reason: e.to_string(),
    })?;
    Ok(ArchiveEntry::new(OVERLAY_MANIFEST, data))
}
