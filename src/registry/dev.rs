//! Development registry backed by a manifest server.
//!
//! The registry URL serves either a single module manifest or a JSON array of
//! manifest URLs. Manifest fields may be indirections of the form
//! `{"$ref": "package.json#/version"}`, and resource paths are relative to the
//! manifest that declares them.
//!
//! Manifests are re-read on every query so that a restarted dev server is
//! picked up. Concurrent queries share one in-flight load.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::core::{join_url, ModuleInfo, ModuleType, ResourceRef, VersionInfo, DEFAULT_BRANCH_NAME};
use crate::registry::{Registry, RegistryError, TxReceipt};

/// Manifest fields that may be `$ref` indirections.
const REF_KEYS: [&str; 6] = ["name", "version", "description", "main", "dist", "metadata"];

type Entries = Arc<Vec<DevEntry>>;
type PendingLoad = Shared<BoxFuture<'static, Result<Entries, Arc<RegistryError>>>>;

/// One module as described by a manifest.
#[derive(Debug, Clone)]
struct DevEntry {
    module: ModuleInfo,
    version: VersionInfo,
}

/// A module manifest as served by a dev server, after `$ref` resolution.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevManifest {
    name: String,
    #[serde(default)]
    branch: Option<String>,
    version: String,
    #[serde(rename = "type")]
    module_type: ModuleType,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    dist: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    metadata: Option<String>,
    #[serde(default)]
    context_ids: Vec<String>,
    #[serde(default)]
    interfaces: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    config: Option<DevConfigRefs>,
    #[serde(default)]
    overlays: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct DevConfigRefs {
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    default: Option<String>,
}

/// Read-only registry served by a development manifest server.
pub struct DevRegistry {
    url: String,
    origin: String,
    client: Client,
    pending: Mutex<Option<PendingLoad>>,
}

impl std::fmt::Debug for DevRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevRegistry")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl DevRegistry {
    pub fn new(url: impl Into<String>, client: Client) -> Result<Self, RegistryError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|source| RegistryError::InvalidUrl {
            url: url.clone(),
            source,
        })?;

        Ok(DevRegistry {
            origin: parsed.origin().ascii_serialization(),
            url,
            client,
            pending: Mutex::new(None),
        })
    }

    /// Load every manifest, joining a load already in flight if there is one.
    async fn entries(&self) -> Result<Entries, RegistryError> {
        let load = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(load) => load.clone(),
                None => {
                    let load = load_entries(self.client.clone(), self.url.clone(), self.origin.clone())
                        .map(|result| result.map_err(Arc::new))
                        .boxed()
                        .shared();
                    *pending = Some(load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|current| current.ptr_eq(&load)) {
            *pending = None;
        }

        result.map_err(RegistryError::Shared)
    }
}

#[async_trait]
impl Registry for DevRegistry {
    fn url(&self) -> &str {
        &self.url
    }

    async fn module_info_by_name(&self, name: &str) -> Result<Option<ModuleInfo>, RegistryError> {
        let entries = self.entries().await?;
        Ok(entries
            .iter()
            .find(|e| e.module.name == name)
            .map(|e| e.module.clone()))
    }

    async fn version_numbers(
        &self,
        name: &str,
        branch: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let entries = self.entries().await?;
        Ok(entries
            .iter()
            .filter(|e| e.version.name == name && e.version.branch == branch)
            .map(|e| e.version.version.clone())
            .collect())
    }

    async fn version_info(
        &self,
        name: &str,
        branch: &str,
        version: &str,
    ) -> Result<Option<VersionInfo>, RegistryError> {
        let entries = self.entries().await?;
        Ok(entries
            .iter()
            .find(|e| {
                e.version.name == name && e.version.branch == branch && e.version.version == version
            })
            .map(|e| e.version.clone()))
    }

    async fn add_module(
        &self,
        _module: &ModuleInfo,
        _version: &VersionInfo,
    ) -> Result<TxReceipt, RegistryError> {
        Err(RegistryError::ReadOnly {
            url: self.url.clone(),
        })
    }
}

async fn load_entries(client: Client, url: String, origin: String) -> Result<Entries, RegistryError> {
    tracing::debug!("Loading dev manifests from {}", url);

    let entries = match get_json(&client, &url).await? {
        Value::Array(items) => {
            let manifest_urls = items
                .iter()
                .map(|item| match item {
                    Value::String(rel) => join_url(&origin, rel).map_err(|source| {
                        RegistryError::InvalidUrl {
                            url: rel.clone(),
                            source,
                        }
                    }),
                    other => Err(RegistryError::Manifest {
                        url: url.clone(),
                        message: format!("expected a manifest URL, found `{}`", other),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;

            try_join_all(
                manifest_urls
                    .iter()
                    .map(|manifest_url| load_manifest(&client, &url, manifest_url)),
            )
            .await?
        }
        Value::Object(manifest) => vec![entry_from_manifest(&client, &url, &url, manifest).await?],
        _ => {
            return Err(RegistryError::Manifest {
                url,
                message: "expected a manifest object or an array of manifest URLs".to_string(),
            })
        }
    };

    Ok(Arc::new(entries))
}

async fn load_manifest(
    client: &Client,
    registry_url: &str,
    manifest_url: &str,
) -> Result<DevEntry, RegistryError> {
    match get_json(client, manifest_url).await? {
        Value::Object(manifest) => {
            entry_from_manifest(client, registry_url, manifest_url, manifest).await
        }
        _ => Err(RegistryError::Manifest {
            url: manifest_url.to_string(),
            message: "expected a JSON object".to_string(),
        }),
    }
}

async fn entry_from_manifest(
    client: &Client,
    registry_url: &str,
    manifest_url: &str,
    mut manifest: Map<String, Value>,
) -> Result<DevEntry, RegistryError> {
    resolve_refs(client, manifest_url, &mut manifest).await?;
    let manifest: DevManifest =
        serde_json::from_value(Value::Object(manifest)).map_err(|source| RegistryError::Json {
            url: manifest_url.to_string(),
            source,
        })?;
    into_entry(manifest, registry_url, manifest_url)
}

/// Replace `{"$ref": "doc.json#/path"}` values with the referenced value.
async fn resolve_refs(
    client: &Client,
    manifest_url: &str,
    manifest: &mut Map<String, Value>,
) -> Result<(), RegistryError> {
    let mut documents: HashMap<String, Value> = HashMap::new();

    for key in REF_KEYS {
        let Some(reference) = manifest
            .get(key)
            .and_then(|v| v.get("$ref"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            continue;
        };

        let (document, path) = reference
            .split_once("#/")
            .unwrap_or((reference.as_str(), ""));
        let document_url = join_url(manifest_url, document).map_err(|source| {
            RegistryError::InvalidUrl {
                url: reference.clone(),
                source,
            }
        })?;

        if !documents.contains_key(&document_url) {
            let json = get_json(client, &document_url).await?;
            documents.insert(document_url.clone(), json);
        }

        let value = documents
            .get(&document_url)
            .and_then(|json| {
                if path.is_empty() {
                    Some(json)
                } else {
                    json.pointer(&format!("/{}", path))
                }
            })
            .cloned()
            .ok_or_else(|| RegistryError::Manifest {
                url: manifest_url.to_string(),
                message: format!("unresolved reference `{}` in `{}`", reference, key),
            })?;

        manifest.insert(key.to_string(), value);
    }

    Ok(())
}

fn into_entry(
    manifest: DevManifest,
    registry_url: &str,
    manifest_url: &str,
) -> Result<DevEntry, RegistryError> {
    let locate_opt = |relative: &Option<String>| {
        relative
            .as_deref()
            .map(|rel| locate(manifest_url, rel))
            .transpose()
    };

    let config = manifest.config.unwrap_or_default();

    let mut module = ModuleInfo::new(&manifest.name, manifest.module_type);
    module.registry_url = Some(registry_url.to_string());
    module.title = manifest.title.unwrap_or_default();
    module.description = manifest.description.unwrap_or_default();
    module.metadata = locate_opt(&manifest.metadata)?;
    module.icon = locate_opt(&manifest.icon)?;
    module.interfaces = manifest.interfaces.keys().cloned().collect();
    module.context_ids = manifest.context_ids;

    let branch = manifest
        .branch
        .unwrap_or_else(|| DEFAULT_BRANCH_NAME.to_string());
    let mut version = VersionInfo::new(&manifest.name, branch, manifest.version, manifest.module_type);
    version.registry_url = Some(registry_url.to_string());
    version.main = locate_opt(&manifest.main)?;
    version.dist = locate_opt(&manifest.dist)?;
    version.schema_config = locate_opt(&config.schema)?;
    version.default_config = locate_opt(&config.default)?;
    version.dependencies = manifest.dependencies;
    version.interfaces = manifest.interfaces;
    if !manifest.overlays.is_empty() {
        let mut overlays = BTreeMap::new();
        for (name, rel) in &manifest.overlays {
            overlays.insert(name.clone(), locate(manifest_url, rel)?);
        }
        version.overlays = Some(overlays);
    }

    Ok(DevEntry { module, version })
}

/// A hash-less reference to `relative`, resolved against `manifest_url`.
fn locate(manifest_url: &str, relative: &str) -> Result<ResourceRef, RegistryError> {
    join_url(manifest_url, relative)
        .map(ResourceRef::from_uri)
        .map_err(|source| RegistryError::InvalidUrl {
            url: relative.to_string(),
            source,
        })
}

async fn get_json(client: &Client, url: &str) -> Result<Value, RegistryError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| RegistryError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(RegistryError::Status {
            url: url.to_string(),
            status,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|source| RegistryError::Request {
            url: url.to_string(),
            source,
        })?;

    serde_json::from_slice(&body).map_err(|source| RegistryError::Json {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_routes, MockHttpResponse};

    fn widget_manifest() -> &'static str {
        r#"{
            "name": "widget",
            "type": "FEATURE",
            "title": "Widget",
            "version": { "$ref": "package.json#/version" },
            "description": { "$ref": "package.json#/description" },
            "main": "index.js",
            "icon": "icons/widget.png",
            "contextIds": ["example.com"],
            "interfaces": { "widget-config": "0.1.0" },
            "config": { "default": "config/default.json" },
            "overlays": { "popup": "http://localhost:3000/" }
        }"#
    }

    fn package_json() -> &'static str {
        r#"{ "version": "2.0.0", "description": "Adds a widget" }"#
    }

    #[test]
    fn test_into_entry_resolves_paths() {
        let manifest: DevManifest = serde_json::from_str(
            r#"{ "name": "widget", "type": "ADAPTER", "version": "1.0.0",
                 "main": "dist/index.js", "metadata": "/meta.png" }"#,
        )
        .unwrap();

        let entry = into_entry(
            manifest,
            "https://dev.test/registry.json",
            "https://dev.test/widget/dapplet.json",
        )
        .unwrap();

        assert_eq!(entry.version.branch, "default");
        assert_eq!(
            entry.version.main,
            Some(ResourceRef::from_uri("https://dev.test/widget/dist/index.js"))
        );
        assert_eq!(
            entry.module.metadata,
            Some(ResourceRef::from_uri("https://dev.test/meta.png"))
        );
        assert_eq!(
            entry.module.registry_url.as_deref(),
            Some("https://dev.test/registry.json")
        );
        assert!(entry.version.overlays.is_none());
    }

    #[tokio::test]
    async fn test_single_manifest_with_refs() {
        let server = serve_routes(vec![
            ("/dapplet.json", MockHttpResponse::ok(widget_manifest())),
            ("/package.json", MockHttpResponse::ok(package_json())),
        ])
        .await;
        let registry =
            DevRegistry::new(format!("{}/dapplet.json", server.url), Client::new()).unwrap();

        let module = registry.module_info_by_name("widget").await.unwrap().unwrap();
        assert_eq!(module.description, "Adds a widget");
        assert_eq!(module.interfaces, vec!["widget-config"]);
        assert_eq!(
            module.icon,
            Some(ResourceRef::from_uri(format!("{}/icons/widget.png", server.url)))
        );

        let versions = registry.version_numbers("widget", "default").await.unwrap();
        assert_eq!(versions, vec!["2.0.0"]);

        let vi = registry
            .version_info("widget", "default", "2.0.0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            vi.main,
            Some(ResourceRef::from_uri(format!("{}/index.js", server.url)))
        );
        assert_eq!(
            vi.default_config,
            Some(ResourceRef::from_uri(format!("{}/config/default.json", server.url)))
        );
        assert_eq!(
            vi.overlays.unwrap()["popup"],
            ResourceRef::from_uri("http://localhost:3000/")
        );

        assert!(registry.module_info_by_name("other").await.unwrap().is_none());
        assert!(registry
            .version_info("widget", "beta", "2.0.0")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_manifest_list() {
        let server = serve_routes(vec![
            (
                "/registry.json",
                MockHttpResponse::ok(r#"["/a/dapplet.json", "/b/dapplet.json"]"#),
            ),
            (
                "/a/dapplet.json",
                MockHttpResponse::ok(r#"{"name": "a", "type": "FEATURE", "version": "1.0.0"}"#),
            ),
            (
                "/b/dapplet.json",
                MockHttpResponse::ok(
                    r#"{"name": "b", "type": "CONFIG", "branch": "beta", "version": "0.3.0", "main": "config.json"}"#,
                ),
            ),
        ])
        .await;
        let registry =
            DevRegistry::new(format!("{}/registry.json", server.url), Client::new()).unwrap();

        assert!(registry.module_info_by_name("a").await.unwrap().is_some());
        let vi = registry
            .version_info("b", "beta", "0.3.0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vi.module_type, ModuleType::ParserConfig);
        assert_eq!(
            vi.main,
            Some(ResourceRef::from_uri(format!("{}/b/config.json", server.url)))
        );
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_load() {
        let server = serve_routes(vec![
            ("/dapplet.json", MockHttpResponse::ok(widget_manifest())),
            ("/package.json", MockHttpResponse::ok(package_json())),
        ])
        .await;
        let registry =
            DevRegistry::new(format!("{}/dapplet.json", server.url), Client::new()).unwrap();

        let (a, b) = tokio::join!(
            registry.module_info_by_name("widget"),
            registry.version_numbers("widget", "default")
        );
        assert!(a.unwrap().is_some());
        assert_eq!(b.unwrap(), vec!["2.0.0"]);
        assert_eq!(server.hits("/dapplet.json"), 1);

        // a finished load is not cached
        registry.module_info_by_name("widget").await.unwrap();
        assert_eq!(server.hits("/dapplet.json"), 2);
    }

    #[tokio::test]
    async fn test_unreachable_and_malformed() {
        let server = serve_routes(vec![("/broken.json", MockHttpResponse::ok("{ nope"))]).await;

        let registry =
            DevRegistry::new(format!("{}/missing.json", server.url), Client::new()).unwrap();
        let err = registry.module_info_by_name("x").await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));

        let registry =
            DevRegistry::new(format!("{}/broken.json", server.url), Client::new()).unwrap();
        let err = registry.module_info_by_name("x").await.unwrap_err();
        assert!(err.to_string().starts_with("invalid JSON at"));
    }

    #[tokio::test]
    async fn test_is_read_only() {
        let registry = DevRegistry::new("http://localhost:3001/dapplet.json", Client::new()).unwrap();
        let module = ModuleInfo::new("widget", ModuleType::Feature);
        let version = VersionInfo::new("widget", "default", "1.0.0", ModuleType::Feature);

        let err = registry.add_module(&module, &version).await.unwrap_err();
        assert!(matches!(err, RegistryError::ReadOnly { .. }));
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            DevRegistry::new("not a url", Client::new()),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }
}
