//! Directory-tree facade over a Drive-shaped REST object store.
//!
//! Objects have opaque IDs and a parents relationship; folders are files
//! with a folder mime type. Paths are resolved one segment at a time, and
//! file opens are download-then-cache-then-reopen.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::dircache::{DirCache, DirEntry};
use super::filecache::{CacheSlot, FileCache, FileMode};
use super::oauth::Authenticator;
use super::rest::{url_encode, Method, RestError, RestRequest, RestResponse, RestTransport};

/// Cache namespace key for this backend.
pub const SCHEME: &str = "googledrive://";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const COPY_BLOCK: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum RemoteFsError {
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("adapter not started")]
    NotStarted,
}

/// Endpoints and tunables for one backend instance.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub api_base: String,
    pub token_url: String,
    pub cache_root: PathBuf,
    pub download_idle_timeout: Duration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            cache_root: std::env::temp_dir().join("ndev-file-cache"),
            download_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// The remote filesystem adapter.
pub struct DriveFs {
    config: DriveConfig,
    transport: Box<dyn RestTransport>,
    auth: Authenticator,
    dircache: DirCache,
    filecache: FileCache,
    started: bool,
}

impl DriveFs {
    pub fn new(config: DriveConfig, transport: Box<dyn RestTransport>) -> Result<Self, RemoteFsError> {
        let filecache = FileCache::new(config.cache_root.clone())?;
        let auth = Authenticator::new(config.token_url.clone());
        Ok(Self {
            config,
            transport,
            auth,
            dircache: DirCache::new(),
            filecache,
            started: false,
        })
    }

    /// Exchange the authorization code and bring the adapter up. Returns
    /// `false` when already started or when the exchange fails.
    pub fn start(&mut self, client_id: &str, client_secret: &str, access_code: &str) -> bool {
        if self.started {
            return false;
        }
        match self
            .auth
            .exchange_code(self.transport.as_mut(), client_id, client_secret, access_code)
        {
            Ok(()) => {
                debug!("remote filesystem started");
                self.started = true;
                true
            }
            Err(e) => {
                warn!(error = %e, "OAuth exchange failed");
                false
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// One authenticated round-trip. A 401 refreshes the access token
    /// exactly once and retries the same request.
    fn api_request(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<RestResponse, RemoteFsError> {
        let url = format!("{}{}", self.config.api_base, endpoint);
        let build = |bearer: String| {
            let mut req = RestRequest::new(method, url.clone()).header("Authorization", &bearer);
            if let Some(b) = &body {
                req = req
                    .header("Content-Type", "application/json")
                    .body(b.as_bytes().to_vec());
            }
            req
        };

        let mut response = self.transport.request(&build(self.auth.bearer()))?;
        if response.status == 401 && self.auth.refresh(self.transport.as_mut()).is_ok() {
            response = self.transport.request(&build(self.auth.bearer()))?;
        }
        Ok(response)
    }

    /// GET an endpoint and parse the body as JSON. Transport failures and
    /// malformed bodies both come back as `None`.
    fn get_json(&mut self, endpoint: &str) -> Option<Value> {
        let response = match self.api_request(Method::Get, endpoint, None) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, endpoint, "request failed");
                return None;
            }
        };
        if !response.is_success() {
            return None;
        }
        serde_json::from_slice(&response.body).ok()
    }

    /// First file ID matched by a files query, if any.
    fn query_single_id(&mut self, q: &str) -> Option<String> {
        let endpoint = format!("/files?q={}", url_encode(q));
        let json = self.get_json(&endpoint)?;
        json.get("files")?
            .get(0)?
            .get("id")?
            .as_str()
            .map(str::to_string)
    }

    /// Resolve a directory path to its folder ID by walking from `root`.
    pub fn folder_id(&mut self, path: &str) -> Option<String> {
        if path.is_empty() || path == "/" {
            return Some("root".to_string());
        }
        let mut current = "root".to_string();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.query_single_id(&format!(
                "name='{component}' and '{current}' in parents and mimeType='{FOLDER_MIME}' and trashed=false"
            ))?;
        }
        Some(current)
    }

    /// Resolve a file path to its ID; the last segment may be any kind of
    /// object.
    pub fn file_id(&mut self, path: &str) -> Option<String> {
        let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let filename = components.pop()?;
        let parent = self.folder_id(&join_path(&components))?;
        self.query_single_id(&format!(
            "name='{filename}' and '{parent}' in parents and trashed=false"
        ))
    }

    pub fn exists(&mut self, path: &str) -> bool {
        self.started && self.file_id(path).is_some()
    }

    pub fn is_dir(&mut self, path: &str) -> bool {
        self.started && self.folder_id(path).is_some()
    }

    /// Delete a file by path.
    pub fn remove(&mut self, path: &str) -> bool {
        if !self.started {
            return false;
        }
        let Some(id) = self.file_id(path) else {
            return false;
        };
        self.mutate(Method::Delete, &format!("/files/{id}"), None)
    }

    /// Rename a file to the last segment of `to`.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        if !self.started {
            return false;
        }
        let Some(id) = self.file_id(from) else {
            return false;
        };
        let Some(new_name) = to.split('/').filter(|c| !c.is_empty()).last() else {
            return false;
        };
        let body = serde_json::json!({ "name": new_name }).to_string();
        self.mutate(Method::Post, &format!("/files/{id}"), Some(body))
    }

    /// Create a folder under the parent named by `path`.
    pub fn mkdir(&mut self, path: &str) -> bool {
        if !self.started {
            return false;
        }
        let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some(name) = components.pop() else {
            return false;
        };
        let Some(parent) = self.folder_id(&join_path(&components)) else {
            return false;
        };
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent],
        })
        .to_string();
        self.mutate(Method::Post, "/files", Some(body))
    }

    /// Delete a folder by path. The store root is refused.
    pub fn rmdir(&mut self, path: &str) -> bool {
        if !self.started {
            return false;
        }
        let Some(id) = self.folder_id(path) else {
            return false;
        };
        if id == "root" {
            return false;
        }
        self.mutate(Method::Delete, &format!("/files/{id}"), None)
    }

    fn mutate(&mut self, method: Method, endpoint: &str, body: Option<String>) -> bool {
        match self.api_request(method, endpoint, body) {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!(error = %e, endpoint, "mutation failed");
                false
            }
        }
    }

    /// List `path`, fetching from the store only when the cache does not
    /// already hold this directory.
    pub fn dir_open(&mut self, path: &str, pattern: Option<&str>, opts: u16) -> bool {
        if !self.started {
            return false;
        }

        if self.dircache.last_dir() == path && !self.dircache.is_empty() {
            debug!(path, "using directory cache");
        } else {
            self.dircache.clear();

            let Some(folder) = self.folder_id(path) else {
                return false;
            };
            let endpoint = format!(
                "/files?q={}&fields=files(id,name,mimeType,size,modifiedTime)",
                url_encode(&format!("'{folder}' in parents and trashed=false"))
            );
            let Some(json) = self.get_json(&endpoint) else {
                return false;
            };
            let Some(files) = json.get("files").and_then(Value::as_array) else {
                return false;
            };

            self.dircache.begin_fill(path);
            for file in files {
                let Some(name) = file.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let entry = DirEntry {
                    filename: name.to_string(),
                    size: parse_size(file.get("size")),
                    modified_time: file
                        .get("modifiedTime")
                        .and_then(Value::as_str)
                        .map(parse_modified_time)
                        .unwrap_or(0),
                    is_dir: file.get("mimeType").and_then(Value::as_str) == Some(FOLDER_MIME),
                };
                debug!(name = %entry.filename, dir = entry.is_dir, size = entry.size, "dir entry");
                self.dircache.push(entry);
            }
        }

        self.dircache.apply_filter(pattern, opts);
        true
    }

    pub fn dir_read(&mut self) -> Option<&DirEntry> {
        self.dircache.read()
    }

    /// The cache is retained so a re-open of the same path is free.
    pub fn dir_close(&mut self) {}

    pub fn dir_tell(&self) -> u16 {
        self.dircache.tell()
    }

    pub fn dir_seek(&mut self, pos: u16) -> bool {
        self.dircache.seek(pos)
    }

    /// Open a remote file through the content cache, downloading the whole
    /// object on a miss.
    pub fn open_file(&mut self, path: &str, mode: FileMode) -> Option<File> {
        if !self.started {
            return None;
        }
        if let Some(file) = self.filecache.open(SCHEME, path, mode) {
            return Some(file);
        }

        let slot = match self.filecache.create(SCHEME, path) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(error = %e, "could not create cache entry");
                return None;
            }
        };
        let Some(id) = self.file_id(path) else {
            self.filecache.remove(slot);
            return None;
        };

        let mut slot = slot;
        if !self.download(&id, &mut slot) {
            debug!(path, "download cancelled");
            self.filecache.remove(slot);
            return None;
        }
        self.filecache.reopen(slot, mode).ok()
    }

    /// Pull the object body in blocks, rearming the idle timeout on every
    /// successful read. Returns `false` on timeout, stream failure, or
    /// cache write failure.
    fn download(&mut self, id: &str, slot: &mut CacheSlot) -> bool {
        let url = format!("{}/files/{}?alt=media", self.config.api_base, id);
        let headers = vec![("Authorization".to_string(), self.auth.bearer())];
        let mut stream = match self.transport.get_stream(&url, &headers) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "download request failed");
                return false;
            }
        };

        let idle_polls = 1 + self.config.download_idle_timeout.as_millis() as u64
            / POLL_INTERVAL.as_millis() as u64;
        let mut polls_left = idle_polls;
        let mut buf = vec![0u8; COPY_BLOCK];

        loop {
            let available = stream.available();
            if available == 0 {
                if stream.done() {
                    return true;
                }
                polls_left -= 1;
                if polls_left == 0 {
                    debug!("download idle timeout");
                    return false;
                }
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let want = available.min(COPY_BLOCK);
            match stream.read(&mut buf[..want]) {
                Ok(n) if n == want => {
                    if FileCache::write(slot, &buf[..n]).is_err() {
                        debug!("cache write failed");
                        return false;
                    }
                    polls_left = idle_polls;
                }
                Ok(_) | Err(_) => {
                    debug!("stream read failed");
                    return false;
                }
            }
        }
    }
}

fn join_path(components: &[&str]) -> String {
    if components.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for component in components {
        out.push('/');
        out.push_str(component);
    }
    out
}

fn parse_size(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::String(s)) => s.parse::<u64>().unwrap_or(0).min(u64::from(u32::MAX)) as u32,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0).min(u64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

fn parse_modified_time(s: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .map(|dt| dt.and_utc().timestamp())
        })
        .unwrap_or(0)
}
