//! Module and version metadata.
//!
//! These mirror the records a registry stores. Field names serialize in
//! camelCase to match the registry and manifest JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::resource::{ResourceRef, StorageRef};

/// Name of the branch used when a manifest does not declare one.
pub const DEFAULT_BRANCH_NAME: &str = "default";

/// Kind of module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    #[serde(rename = "FEATURE")]
    Feature,
    #[serde(rename = "ADAPTER")]
    Adapter,
    #[serde(rename = "LIBRARY")]
    Library,
    #[serde(rename = "INTERFACE")]
    Interface,
    /// A parser configuration document rather than executable code
    #[serde(rename = "CONFIG")]
    ParserConfig,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Feature => "FEATURE",
            ModuleType::Adapter => "ADAPTER",
            ModuleType::Library => "LIBRARY",
            ModuleType::Interface => "INTERFACE",
            ModuleType::ParserConfig => "CONFIG",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and descriptive metadata of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// Registry that issued this record
    #[serde(default)]
    pub registry_url: Option<String>,

    pub name: String,

    #[serde(rename = "type")]
    pub module_type: ModuleType,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub image: Option<ResourceRef>,

    /// Detailed description image; republished by the pipeline
    #[serde(default)]
    pub metadata: Option<ResourceRef>,

    #[serde(default)]
    pub icon: Option<ResourceRef>,

    /// Declared interface names
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Context identifiers the module activates on
    #[serde(default)]
    pub context_ids: Vec<String>,

    #[serde(default)]
    pub is_under_construction: bool,
}

impl ModuleInfo {
    /// Create a module record with only the required fields set.
    pub fn new(name: impl Into<String>, module_type: ModuleType) -> Self {
        ModuleInfo {
            registry_url: None,
            name: name.into(),
            module_type,
            title: String::new(),
            description: String::new(),
            author: None,
            image: None,
            metadata: None,
            icon: None,
            interfaces: Vec::new(),
            context_ids: Vec::new(),
            is_under_construction: false,
        }
    }
}

/// One published version of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub registry_url: Option<String>,

    #[serde(rename = "type")]
    pub module_type: ModuleType,

    pub name: String,

    pub branch: String,

    /// Semantic version string
    pub version: String,

    /// Entry bundle, or the parser-config document
    #[serde(default)]
    pub main: Option<ResourceRef>,

    /// Packaged distributable, produced by the publish pipeline
    #[serde(default)]
    pub dist: Option<StorageRef>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Interface name -> version constraint
    #[serde(default)]
    pub interfaces: BTreeMap<String, String>,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub schema_config: Option<ResourceRef>,

    #[serde(default)]
    pub default_config: Option<ResourceRef>,

    /// Overlay name -> asset directory
    #[serde(default)]
    pub overlays: Option<BTreeMap<String, ResourceRef>>,

    #[serde(default)]
    pub extension_version: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,
}

impl VersionInfo {
    /// Create a version record with only the required fields set.
    pub fn new(
        name: impl Into<String>,
        branch: impl Into<String>,
        version: impl Into<String>,
        module_type: ModuleType,
    ) -> Self {
        VersionInfo {
            registry_url: None,
            module_type,
            name: name.into(),
            branch: branch.into(),
            version: version.into(),
            main: None,
            dist: None,
            dependencies: BTreeMap::new(),
            interfaces: BTreeMap::new(),
            environment: None,
            schema_config: None,
            default_config: None,
            overlays: None,
            extension_version: None,
            created_at: None,
        }
    }

    /// `name#branch@version`
    pub fn id(&self) -> String {
        format!("{}#{}@{}", self.name, self.branch, self.version)
    }
}
