//! Test utilities and mocks for dapplets unit tests.
//!
//! This module provides in-memory implementations of the storage driver and
//! registry seams, plus a tiny loopback HTTP server for exercising the real
//! network drivers.
//!
//! # Example
//!
//! ```rust,ignore
//! use dapplets::test_support::{MemoryStorage, serve_http};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ipfs = MemoryStorage::new(BackendType::Ipfs).with_directories();
//!     ipfs.insert("ipfs://bafy", "payload");
//!
//!     let url = serve_http("200 OK", b"hello").await;
//!     // Point a driver at `url`...
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::core::{ModuleInfo, VersionInfo};
use crate::registry::{Registry, RegistryError, TxReceipt};
use crate::storage::driver::{BackendType, DirectoryUpload, Stored, StorageDriver};
use crate::storage::error::StorageError;
use crate::util::archive::{pack_tar, ArchiveEntry};
use crate::util::hash::{digest, Hash};

/// Package `files` the way the aggregator does before a directory upload.
pub fn directory_upload(files: Vec<ArchiveEntry>) -> DirectoryUpload {
    let archive = Bytes::from(pack_tar(&files).unwrap());
    DirectoryUpload {
        hash: digest(&archive),
        archive,
        files,
    }
}

/// Decrements an in-flight counter when a fetch finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory storage backend.
///
/// Objects are keyed by locator. Uploads are stored under a locator derived
/// from the content hash, in the shape the real backend would return.
#[derive(Debug)]
pub struct MemoryStorage {
    backend: BackendType,
    objects: Mutex<HashMap<String, Bytes>>,
    latency: Duration,
    directories: bool,
    fail_uploads: bool,
    reported_hash: Option<String>,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
    stored: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(backend: BackendType) -> Self {
        MemoryStorage {
            backend,
            objects: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            directories: false,
            fail_uploads: false,
            reported_hash: None,
            in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            stored: AtomicUsize::new(0),
        }
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Accept directory uploads.
    pub fn with_directories(mut self) -> Self {
        self.directories = true;
        self
    }

    /// Reject every upload.
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Report `hash` from uploads instead of the real content hash.
    pub fn reporting_hash(mut self, hash: impl Into<String>) -> Self {
        self.reported_hash = Some(hash.into());
        self
    }

    /// Serve `data` at `uri`.
    pub fn insert(&self, uri: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(uri.to_string(), data.into());
    }

    /// Object stored at `uri`, if any.
    pub fn get(&self, uri: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(uri).cloned()
    }

    /// Fetches currently suspended in this backend.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fetches that ran to completion, hit or miss.
    pub fn completed_fetches(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Successful uploads, blobs and directories.
    pub fn stored_count(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    fn locator(&self, hash: &Hash) -> String {
        match self.backend {
            BackendType::Http => format!("https://memory.test/{}", hash.to_hex()),
            BackendType::Ipfs => format!("ipfs://{}", hash.to_hex()),
            BackendType::Centralized => hash.to_hex(),
        }
    }

    fn put(&self, data: Bytes) -> Result<Stored, StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Rejected {
                backend: self.backend,
                message: "backend unavailable".to_string(),
            });
        }

        let hash = digest(&data);
        let uri = self.locator(&hash);
        self.insert(&uri, data);
        self.stored.fetch_add(1, Ordering::SeqCst);

        let reported_hash = match self.backend {
            BackendType::Centralized => Some(
                self.reported_hash
                    .clone()
                    .unwrap_or_else(|| hash.to_string()),
            ),
            _ => None,
        };
        Ok(Stored { uri, reported_hash })
    }
}

#[async_trait]
impl StorageDriver for MemoryStorage {
    async fn fetch(&self, uri: &str, cancel: &CancellationToken) -> Result<Bytes, StorageError> {
        let _guard = InFlight::enter(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(StorageError::Cancelled { uri: uri.to_string() });
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        self.get(uri).ok_or_else(|| StorageError::Status {
            uri: uri.to_string(),
            status: StatusCode::NOT_FOUND,
        })
    }

    async fn store(&self, data: Bytes) -> Result<Stored, StorageError> {
        self.put(data)
    }

    async fn store_directory(
        &self,
        dir: &DirectoryUpload,
    ) -> Result<Option<Stored>, StorageError> {
        if !self.directories {
            return Ok(None);
        }
        self.put(dir.archive.clone()).map(Some)
    }
}

/// In-memory registry.
///
/// `version_numbers` returns versions in insertion order, not sorted.
#[derive(Debug)]
pub struct MockRegistry {
    url: String,
    modules: Mutex<Vec<ModuleInfo>>,
    versions: Mutex<Vec<VersionInfo>>,
    added: Mutex<Vec<(ModuleInfo, VersionInfo)>>,
    unavailable_for: AtomicU32,
    lookups: AtomicU32,
}

impl MockRegistry {
    pub fn new(url: impl Into<String>) -> Self {
        MockRegistry {
            url: url.into(),
            modules: Mutex::new(Vec::new()),
            versions: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            unavailable_for: AtomicU32::new(0),
            lookups: AtomicU32::new(0),
        }
    }

    pub fn with_module(self, module: ModuleInfo) -> Self {
        self.modules.lock().unwrap().push(module);
        self
    }

    pub fn with_version(self, version: VersionInfo) -> Self {
        self.versions.lock().unwrap().push(version);
        self
    }

    /// Fail the first `n` module lookups as if the server were down.
    pub fn unavailable_for(self, n: u32) -> Self {
        self.unavailable_for.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `module_info_by_name` calls so far.
    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Records submitted through `add_module`.
    pub fn added(&self) -> Vec<(ModuleInfo, VersionInfo)> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for MockRegistry {
    fn url(&self) -> &str {
        &self.url
    }

    async fn module_info_by_name(&self, name: &str) -> Result<Option<ModuleInfo>, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let down = self
            .unavailable_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if down {
            return Err(RegistryError::Status {
                url: self.url.clone(),
                status: StatusCode::SERVICE_UNAVAILABLE,
            });
        }

        Ok(self
            .modules
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn version_numbers(
        &self,
        name: &str,
        branch: &str,
    ) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.name == name && v.branch == branch)
            .map(|v| v.version.clone())
            .collect())
    }

    async fn version_info(
        &self,
        name: &str,
        branch: &str,
        version: &str,
    ) -> Result<Option<VersionInfo>, RegistryError> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.name == name && v.branch == branch && v.version == version)
            .cloned())
    }

    async fn add_module(
        &self,
        module: &ModuleInfo,
        version: &VersionInfo,
    ) -> Result<TxReceipt, RegistryError> {
        let mut added = self.added.lock().unwrap();
        added.push((module.clone(), version.clone()));
        Ok(TxReceipt {
            hash: format!("0x{:064x}", added.len()),
            from: "0x00000000000000000000000000000000000000aa".to_string(),
        })
    }
}

/// Canned HTTP response for the loopback server.
#[derive(Debug, Clone)]
pub struct MockHttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl MockHttpResponse {
    /// Create a successful response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        MockHttpResponse {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Create a not found response.
    pub fn not_found() -> Self {
        MockHttpResponse {
            status: 404,
            headers: Vec::new(),
            body: b"Not Found".to_vec(),
        }
    }

    /// Add a header to the response.
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    fn to_bytes(&self) -> Vec<u8> {
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason);
        for (key, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", key, value));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// A running loopback server.
#[derive(Debug, Clone)]
pub struct MockServer {
    /// Base URL, `http://127.0.0.1:<port>`
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    /// Paths requested so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| p.as_str() == path).count()
    }
}

/// Serve `routes` (path -> response) on a loopback port; other paths get 404.
pub async fn serve_routes(routes: Vec<(&str, MockHttpResponse)>) -> MockServer {
    let routes: HashMap<String, MockHttpResponse> = routes
        .into_iter()
        .map(|(path, response)| (path.to_string(), response))
        .collect();
    serve(move |path| {
        routes
            .get(path)
            .cloned()
            .unwrap_or_else(MockHttpResponse::not_found)
    })
    .await
}

/// Answer every request with `status_line` (e.g. `"200 OK"`) and `body`.
pub async fn serve_http(status_line: &str, body: &[u8]) -> String {
    serve_http_with_headers(status_line, &[], body).await
}

/// Like [`serve_http`], with extra response headers.
pub async fn serve_http_with_headers(
    status_line: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> String {
    let status = status_line
        .split_whitespace()
        .next()
        .and_then(|code| code.parse().ok())
        .unwrap();
    let mut response = MockHttpResponse {
        status,
        headers: Vec::new(),
        body: body.to_vec(),
    };
    for (key, value) in headers {
        response = response.with_header(key, value);
    }

    serve(move |_| response.clone()).await.url
}

/// Accept connections and never answer them.
pub async fn serve_silent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    url
}

async fn serve<F>(handler: F) -> MockServer
where
    F: Fn(&str) -> MockHttpResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = MockServer {
        url: format!("http://{}", listener.local_addr().unwrap()),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let handler = Arc::new(handler);
    let requests = server.requests.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                let Some(path) = read_request(&mut socket).await else {
                    return;
                };
                requests.lock().unwrap().push(path.clone());
                let response = handler(&path);
                let _ = socket.write_all(&response.to_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    server
}

/// Read one request, body included, and return its path.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let path = head.split_whitespace().nth(1)?.to_string();
    let head_lower = head.to_ascii_lowercase();

    let content_length = head_lower.lines().find_map(|line| {
        line.strip_prefix("content-length:")
            .and_then(|v| v.trim().parse::<usize>().ok())
    });
    let chunked = head_lower.contains("transfer-encoding: chunked");

    loop {
        let body = &buf[header_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => body.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(path)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
