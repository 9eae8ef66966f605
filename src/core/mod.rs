//! Core data structures.

pub mod module;
pub mod resource;
pub mod uri;

pub use module::{ModuleInfo, ModuleType, VersionInfo, DEFAULT_BRANCH_NAME};
pub use resource::{ResourceRef, StorageRef};
pub use uri::{join_url, type_of_uri, UriType};
