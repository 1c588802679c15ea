use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tempfile::Builder;

use crate::error::QcError;

/// Key/value blob store holding the ID registry and its archive.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>, QcError>;
    fn put(&self, key: &str, content: &[u8]) -> Result<(), QcError>;
    fn copy(&self, source: &str, destination: &str) -> Result<(), QcError>;
    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, QcError>;
}

/// Directory-backed store; keys are `/`-separated paths under `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: Utf8PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<Utf8PathBuf, QcError> {
        let valid = !key.is_empty()
            && !key.starts_with('/')
            && key
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !valid {
            return Err(QcError::Filesystem(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(key))
    }

    fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), QcError> {
        let parent = path
            .parent()
            .ok_or_else(|| QcError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| QcError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("gp2qc-object")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| QcError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| QcError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| QcError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, QcError> {
        let path = self.path_for(key)?;
        if !path.as_std_path().is_file() {
            return Err(QcError::StorageNotFound(key.to_string()));
        }
        fs::read(path.as_std_path()).map_err(|err| QcError::Filesystem(err.to_string()))
    }

    fn put(&self, key: &str, content: &[u8]) -> Result<(), QcError> {
        Self::write_atomic(&self.path_for(key)?, content)
    }

    fn copy(&self, source: &str, destination: &str) -> Result<(), QcError> {
        let content = self.get(source)?;
        Self::write_atomic(&self.path_for(destination)?, &content)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, QcError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for path in walk_files(self.root.as_std_path())? {
            let Ok(relative) = path.strip_prefix(self.root.as_std_path()) else {
                continue;
            };
            let key = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) && !is_temp_name(&key) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn is_temp_name(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(".gp2qc-object") || name.starts_with("gp2qc-object"))
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, QcError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| QcError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| QcError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Google Cloud Storage through the JSON API.
#[derive(Clone)]
pub struct GcsObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectListItem {
    name: String,
}

impl GcsObjectStore {
    pub fn new(bucket: impl Into<String>, token: Option<String>) -> Result<Self, QcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gp2qc/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| QcError::StorageHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| QcError::StorageHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: GCS_ENDPOINT.to_string(),
            bucket: bucket.into(),
            token,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            encode_segment(&self.bucket),
            encode_segment(key)
        )
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        key: &str,
    ) -> Result<reqwest::blocking::Response, QcError> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|err| QcError::StorageHttp(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QcError::StorageNotFound(key.to_string()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "storage request failed".to_string());
            return Err(QcError::StorageStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

impl ObjectStore for GcsObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, QcError> {
        let request = self
            .client
            .get(self.object_url(key))
            .query(&[("alt", "media")]);
        let bytes = self
            .send(request, key)?
            .bytes()
            .map_err(|err| QcError::StorageHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn put(&self, key: &str, content: &[u8]) -> Result<(), QcError> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint,
            encode_segment(&self.bucket)
        );
        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content.to_vec());
        self.send(request, key)?;
        Ok(())
    }

    fn copy(&self, source: &str, destination: &str) -> Result<(), QcError> {
        let url = format!(
            "{}/copyTo/b/{}/o/{}",
            self.object_url(source),
            encode_segment(&self.bucket),
            encode_segment(destination)
        );
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body("{}");
        self.send(request, source)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, QcError> {
        let url = format!(
            "{}/storage/v1/b/{}/o",
            self.endpoint,
            encode_segment(&self.bucket)
        );
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(&url).query(&[("prefix", prefix)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: ObjectList = self
                .send(request, prefix)?
                .json()
                .map_err(|err| QcError::StorageHttp(err.to_string()))?;
            keys.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Percent-encodes a single URL path segment (object names keep their `/`
/// as `%2F`, as the JSON API expects).
fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
