//! High-level operations.
//!
//! This module contains the publish pipeline behind `dapplets deploy`.

pub mod bundle;
pub mod deploy;
pub mod error;
pub mod overlay;
pub mod validate;

pub use deploy::{deploy_module, DeployOptions, DeployedModule};
pub use error::DeployError;
