//! Publish pipeline errors.

use miette::Diagnostic;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::storage::StorageError;
use crate::util::archive::ArchiveError;

/// Error raised by the publish pipeline. Any of these aborts the run.
#[derive(Debug, Error, Diagnostic)]
pub enum DeployError {
    #[error("source registry {url} is unavailable after {attempts} attempts")]
    #[diagnostic(
        code(dapplets::deploy::source_unavailable),
        help("Check that the development server is running and that --dev-server-url points at its manifest")
    )]
    SourceUnavailable {
        url: String,
        attempts: u32,
        #[source]
        source: RegistryError,
    },

    #[error("module `{name}` is not found in {registry}{}", on_branch(.branch))]
    #[diagnostic(
        code(dapplets::deploy::module_not_found),
        help("Check the module name and branch, and that the development server serves this module")
    )]
    ModuleNotFound {
        name: String,
        branch: Option<String>,
        registry: String,
    },

    #[error("version {version} of `{name}` (branch {branch}) is not found in {registry}")]
    #[diagnostic(code(dapplets::deploy::version_not_found))]
    VersionNotFound {
        name: String,
        branch: String,
        version: String,
        registry: String,
    },

    #[error("module `{name}` is not registered in {registry}")]
    #[diagnostic(
        code(dapplets::deploy::first_publish),
        help("The first version of a module must be registered through the registry's own publishing flow")
    )]
    FirstPublishNotAllowed { name: String, registry: String },

    #[error("version {version} of `{name}` is not newer than {published}, the latest in {registry}")]
    #[diagnostic(
        code(dapplets::deploy::version_not_newer),
        help("Bump the version in the module manifest")
    )]
    VersionNotNewer {
        name: String,
        version: String,
        published: String,
        registry: String,
    },

    #[error("`{version}` is not a valid semantic version")]
    #[diagnostic(code(dapplets::deploy::invalid_version))]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("invalid module name `{name}`")]
    #[diagnostic(
        code(dapplets::deploy::invalid_name),
        help("Module names use lowercase letters, digits, `-` and `.`, and start and end with a letter or digit")
    )]
    InvalidName { name: String },

    #[error("invalid {asset}: {reason}")]
    #[diagnostic(code(dapplets::deploy::invalid_asset))]
    InvalidAsset { asset: String, reason: String },

    #[error("cannot fetch the assets manifest of overlay `{overlay}` from {url}")]
    #[diagnostic(
        code(dapplets::deploy::assets_manifest_unavailable),
        help("Check that the overlay server is running; self-signed certificates need to be trusted, or left accepted without --strict-tls")
    )]
    AssetsManifestUnavailable {
        overlay: String,
        url: String,
        #[source]
        source: StorageError,
    },

    #[error("the assets manifest of overlay `{overlay}` at {url} {reason}")]
    #[diagnostic(
        code(dapplets::deploy::manifest_invalid),
        help(r#"Example: {{"index.html": "index.html", "styles.css": "css-62d9da.css"}}"#)
    )]
    ManifestInvalid {
        overlay: String,
        url: String,
        reason: String,
    },

    #[error("the assets manifest of overlay `{overlay}` at {url} has no path to `index.html`")]
    #[diagnostic(
        code(dapplets::deploy::manifest_missing_entry),
        help(r#"Example: {{"index.html": "index.html", "styles.css": "css-62d9da.css"}}"#)
    )]
    ManifestMissingEntry { overlay: String, url: String },

    #[error("invalid URL `{url}`")]
    #[diagnostic(code(dapplets::deploy::invalid_url))]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    #[diagnostic(code(dapplets::storage))]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(code(dapplets::registry))]
    Registry(#[from] RegistryError),

    #[error("failed to package the module")]
    #[diagnostic(code(dapplets::archive))]
    Archive(#[from] ArchiveError),
}

fn on_branch(branch: &Option<String>) -> String {
    match branch {
        Some(branch) => format!(" on branch `{}`", branch),
        None => String::new(),
    }
}
