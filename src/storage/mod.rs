//! Storage backends and the aggregator that races and fans out across them.
//!
//! Every backend implements [`StorageDriver`]. The [`StorageAggregator`]
//! resolves resources by racing the drivers that understand a reference's
//! locators, and publishes content to a set of target backends plus the
//! centralized backup.

pub mod aggregator;
pub mod centralized;
pub mod driver;
pub mod error;
pub mod http;
pub mod ipfs;

pub use aggregator::StorageAggregator;
pub use driver::{BackendType, DirectoryUpload, StorageDriver, Stored};
pub use error::StorageError;
