//! Assembly of a module's distributable archive.
//!
//! The archive holds the entry bundle (`index.js`, or `index.json` for a
//! parser config together with the stylesheets it references) and the
//! module's default and schema configs.

use serde_json::Value;

use crate::core::{join_url, ModuleType, ResourceRef, VersionInfo};
use crate::ops::error::DeployError;
use crate::storage::StorageAggregator;
use crate::util::archive::{normalize_path, ArchiveEntry};

/// Nesting limit when walking a parser config.
pub const MAX_CONFIG_DEPTH: usize = 64;

/// Key whose string values name stylesheets in a parser config.
const STYLES_KEY: &str = "styles";

/// Collects string values stored under keys accepted by a predicate,
/// anywhere in a JSON document.
pub struct KeyCollector<P> {
    predicate: P,
    max_depth: usize,
}

impl<P: Fn(&str) -> bool> KeyCollector<P> {
    pub fn new(predicate: P, max_depth: usize) -> Self {
        KeyCollector {
            predicate,
            max_depth,
        }
    }

    /// Matching values in key order, without duplicates.
    ///
    /// Returns `None` when the document nests deeper than the limit.
    pub fn collect(&self, root: &Value) -> Option<Vec<String>> {
        let mut found = Vec::new();
        self.visit(root, 0, &mut found)?;
        Some(found)
    }

    fn visit(&self, value: &Value, depth: usize, found: &mut Vec<String>) -> Option<()> {
        if depth > self.max_depth {
            return None;
        }

        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    match child {
                        Value::String(s) if (self.predicate)(key) => {
                            if !found.contains(s) {
                                found.push(s.clone());
                            }
                        }
                        Value::Object(_) | Value::Array(_) => self.visit(child, depth + 1, found)?,
                        _ => {}
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.visit(item, depth + 1, found)?;
                }
            }
            _ => {}
        }

        Some(())
    }
}

/// Stylesheet paths referenced by a parser config.
pub fn style_references(config: &Value) -> Result<Vec<String>, DeployError> {
    KeyCollector::new(|key| key == STYLES_KEY, MAX_CONFIG_DEPTH)
        .collect(config)
        .ok_or_else(|| DeployError::InvalidAsset {
            asset: "parser config".to_string(),
            reason: format!("nested deeper than {} levels", MAX_CONFIG_DEPTH),
        })
}

/// Fetch everything that goes into the distributable, in archive order.
pub async fn main_entries(
    storage: &StorageAggregator,
    version: &VersionInfo,
) -> Result<Vec<ArchiveEntry>, DeployError> {
    let mut entries = Vec::new();
    let is_parser_config = version.module_type == ModuleType::ParserConfig;

    if let Some(main) = &version.main {
        let data = storage.get_resource(main).await?;

        if is_parser_config {
            entries.push(ArchiveEntry::new("index.json", data.clone()));
            entries.extend(stylesheets(storage, main, &data).await?);
        } else {
            entries.push(ArchiveEntry::new("index.js", data));
        }
    }

    if !is_parser_config {
        if let Some(default_config) = &version.default_config {
            let data = storage.get_resource(default_config).await?;
            entries.push(ArchiveEntry::new("default.json", data));
        }
        if let Some(schema_config) = &version.schema_config {
            let data = storage.get_resource(schema_config).await?;
            entries.push(ArchiveEntry::new("schema.json", data));
        }
    }

    Ok(entries)
}

/// Fetch the stylesheets a parser config references, relative to its own URI.
async fn stylesheets(
    storage: &StorageAggregator,
    main: &ResourceRef,
    config: &[u8],
) -> Result<Vec<ArchiveEntry>, DeployError> {
    let config: Value = serde_json::from_slice(config).map_err(|e| DeployError::InvalidAsset {
        asset: "parser config".to_string(),
        reason: format!("not valid JSON: {}", e),
    })?;

    let styles = style_references(&config)?;
    if styles.is_empty() {
        return Ok(Vec::new());
    }

    let base = main.primary_uri().ok_or_else(|| DeployError::InvalidAsset {
        asset: "parser config".to_string(),
        reason: "stylesheets are referenced but the config has no URI to resolve them against"
            .to_string(),
    })?;

    let mut entries = Vec::with_capacity(styles.len());
    for path in styles {
        let name = normalize_path(&path).map_err(|_| DeployError::InvalidAsset {
            asset: format!("stylesheet `{}`", path),
            reason: "must be a path inside the module, without `..` segments".to_string(),
        })?;
        let url = join_url(base, &path).map_err(|source| DeployError::InvalidUrl {
            url: path.clone(),
            source,
        })?;
        tracing::debug!("Fetching stylesheet {}", url);
        let data = storage.get_resource(&ResourceRef::from_uri(url)).await?;
        entries.push(ArchiveEntry::new(name, data));
    }

    Ok(entries)
}
