//! Pre-publish checks: module name, icon format and version ordering.

use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::core::ResourceRef;
use crate::ops::error::DeployError;

static MODULE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-.]*[a-z0-9]$").expect("module name pattern is valid")
});

/// Check a module name against the registry naming rules.
pub fn validate_module_name(name: &str) -> Result<(), DeployError> {
    if MODULE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DeployError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// A declared icon must be a PNG, by extension or data-URI prefix.
pub fn validate_icon(icon: &ResourceRef) -> Result<(), DeployError> {
    let Some(uri) = icon.primary_uri() else {
        return Ok(());
    };

    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if path.to_ascii_lowercase().ends_with(".png") || uri.starts_with("data:image/png;base64") {
        return Ok(());
    }

    Err(DeployError::InvalidAsset {
        asset: "module icon".to_string(),
        reason: format!("`{}` is not a PNG image", uri),
    })
}

/// The highest version in `versions` by semantic-version order.
///
/// Registries are not trusted to return versions sorted. Returns the
/// version string as the registry spelled it, along with its parsed form.
pub fn latest_version(versions: &[String]) -> Result<Option<(&str, Version)>, DeployError> {
    let mut latest: Option<(&str, Version)> = None;

    for raw in versions {
        let parsed = Version::parse(raw).map_err(|source| DeployError::InvalidVersion {
            version: raw.clone(),
            source,
        })?;
        if latest.as_ref().map_or(true, |(_, best)| parsed > *best) {
            latest = Some((raw.as_str(), parsed));
        }
    }

    Ok(latest)
}

/// Require `candidate` to be strictly newer than what the target already has.
pub fn check_version_gate(
    name: &str,
    candidate: &Version,
    published: Option<&Version>,
    registry: &str,
) -> Result<(), DeployError> {
    match published {
        Some(published) if candidate <= published => Err(DeployError::VersionNotNewer {
            name: name.to_string(),
            version: candidate.to_string(),
            published: published.to_string(),
            registry: registry.to_string(),
        }),
        _ => Ok(()),
    }
}
