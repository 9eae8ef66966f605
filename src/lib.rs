//! Dapplets - publishes dapplet modules to content-addressed storage
//!
//! This crate provides the library behind the `dapplets` CLI: the module
//! data model, storage drivers and their aggregator, registry access, and
//! the publish pipeline.

pub mod core;
pub mod ops;
pub mod registry;
pub mod storage;
pub mod util;

/// Test utilities and mocks for dapplets unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides in-memory storage and registry
/// implementations and a loopback HTTP server.
#[cfg(test)]
pub mod test_support;

pub use core::{ModuleInfo, ModuleType, ResourceRef, StorageRef, VersionInfo};
pub use ops::{deploy_module, DeployError, DeployOptions, DeployedModule};
pub use registry::{Registry, RegistryConfig, RegistryError};
pub use storage::{BackendType, StorageAggregator, StorageError};
pub use util::config::Config;
