//! Object storage backends for raster tiles.
//!
//! Tiles live in containers (`sentinel2-data`, `worldcover-data`) under
//! slash-separated names. Three backends implement [`BlobStore`]:
//!
//! - [`HttpBlobStore`]: Azure-style blob endpoint over HTTPS, optionally
//!   authorised with a SAS query string
//! - [`LocalBlobStore`]: a directory tree `<root>/<container>/<name>`
//! - [`MemoryBlobStore`]: an in-process map, used by tests and tooling

use crate::{Result, TileError};
use parking_lot::RwLock;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Read access to remote or local blob storage.
pub trait BlobStore: Send + Sync {
    /// Fetch a whole blob. Missing blobs are [`TileError::NotFound`].
    fn get(&self, container: &str, name: &str) -> Result<Vec<u8>>;

    /// Fetch `len` bytes starting at `offset`. Reads past the end are
    /// truncated to the blob size.
    fn get_range(&self, container: &str, name: &str, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Blob size in bytes.
    fn size(&self, container: &str, name: &str) -> Result<u64>;

    /// Names under `prefix`, sorted.
    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;
}

fn not_found(container: &str, name: &str) -> TileError {
    TileError::NotFound {
        container: container.to_string(),
        name: name.to_string(),
    }
}

/// Blob storage reached over HTTPS.
pub struct HttpBlobStore {
    base_url: String,
    sas_token: Option<String>,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for HttpBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBlobStore")
            .field("base_url", &self.base_url)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpBlobStore {
    /// Create a store rooted at `base_url` (e.g. `https://acct.blob.core.windows.net`).
    pub fn new(base_url: &str, sas_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            sas_token: sas_token.map(|t| t.trim_start_matches('?').to_string()),
            client,
        })
    }

    fn url(&self, container: &str, name: &str) -> String {
        match &self.sas_token {
            Some(sas) => format!("{}/{}/{}?{}", self.base_url, container, name, sas),
            None => format!("{}/{}/{}", self.base_url, container, name),
        }
    }

    fn check(
        &self,
        response: reqwest::blocking::Response,
        container: &str,
        name: &str,
    ) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found(container, name));
        }
        if !status.is_success() {
            return Err(TileError::DownloadFailed {
                container: container.to_string(),
                name: name.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        Ok(response)
    }
}

/// Extract the text of every `<tag>…</tag>` element in a listing response.
fn xml_elements<'a>(body: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                out.push(&after[..end]);
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    out
}

impl BlobStore for HttpBlobStore {
    fn get(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let response = self.client.get(self.url(container, name)).send()?;
        let bytes = self.check(response, container, name)?.bytes()?;
        Ok(bytes.to_vec())
    }

    fn get_range(&self, container: &str, name: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get(self.url(container, name))
            .header(RANGE, format!("bytes={}-{}", offset, offset + len - 1))
            .send()?;
        let bytes = self.check(response, container, name)?.bytes()?;
        Ok(bytes.to_vec())
    }

    fn size(&self, container: &str, name: &str) -> Result<u64> {
        let response = self.client.head(self.url(container, name)).send()?;
        let response = self.check(response, container, name)?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| TileError::DownloadFailed {
                container: container.to_string(),
                name: name.to_string(),
                reason: "missing Content-Length".to_string(),
            })
    }

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let base = match &self.sas_token {
            Some(sas) => format!("{}/{}?{}", self.base_url, container, sas),
            None => format!("{}/{}", self.base_url, container),
        };
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut query = vec![
                ("restype", "container".to_string()),
                ("comp", "list".to_string()),
                ("prefix", prefix.to_string()),
            ];
            if let Some(m) = &marker {
                query.push(("marker", m.clone()));
            }
            let response = self.client.get(&base).query(&query).send()?;
            let body = self.check(response, container, prefix)?.text()?;
            names.extend(xml_elements(&body, "Name").into_iter().map(String::from));
            marker = xml_elements(&body, "NextMarker")
                .first()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_string());
            if marker.is_none() {
                break;
            }
        }
        debug!("Listed {} blobs under {}/{}", names.len(), container, prefix);
        names.sort();
        Ok(names)
    }
}

/// Blobs stored as files under `<root>/<container>/<name>`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, container: &str, name: &str) -> PathBuf {
        self.root.join(container).join(name)
    }

    fn open(&self, container: &str, name: &str) -> Result<fs::File> {
        fs::File::open(self.path(container, name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                not_found(container, name)
            } else {
                TileError::Io(e)
            }
        })
    }

    fn walk(dir: &Path, rel: &str, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let name = if rel.is_empty() {
                file_name
            } else {
                format!("{}/{}", rel, file_name)
            };
            if entry.file_type()?.is_dir() {
                Self::walk(&entry.path(), &name, out)?;
            } else {
                out.push(name);
            }
        }
        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    fn get(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let mut file = self.open(container, name)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn get_range(&self, container: &str, name: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = self.open(container, name)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        file.take(len).read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn size(&self, container: &str, name: &str) -> Result<u64> {
        Ok(self.open(container, name)?.metadata()?.len())
    }

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join(container);
        if !dir.is_dir() {
            return Err(not_found(container, prefix));
        }
        let mut names = Vec::new();
        Self::walk(&dir, "", &mut names)?;
        names.retain(|n| n.starts_with(prefix));
        names.sort();
        Ok(names)
    }
}

/// Request counters for [`MemoryBlobStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub full_gets: u64,
    pub range_gets: u64,
    pub range_bytes: u64,
}

/// Blobs held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Arc<Vec<u8>>>>,
    full_gets: AtomicU64,
    range_gets: AtomicU64,
    range_bytes: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a blob.
    pub fn put(&self, container: &str, name: &str, bytes: Vec<u8>) {
        self.blobs
            .write()
            .insert((container.to_string(), name.to_string()), Arc::new(bytes));
    }

    /// Remove a blob, returning whether it existed.
    pub fn remove(&self, container: &str, name: &str) -> bool {
        self.blobs
            .write()
            .remove(&(container.to_string(), name.to_string()))
            .is_some()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            full_gets: self.full_gets.load(Ordering::Relaxed),
            range_gets: self.range_gets.load(Ordering::Relaxed),
            range_bytes: self.range_bytes.load(Ordering::Relaxed),
        }
    }

    fn blob(&self, container: &str, name: &str) -> Result<Arc<Vec<u8>>> {
        self.blobs
            .read()
            .get(&(container.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(container, name))
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let blob = self.blob(container, name)?;
        self.full_gets.fetch_add(1, Ordering::Relaxed);
        Ok(blob.as_ref().clone())
    }

    fn get_range(&self, container: &str, name: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let blob = self.blob(container, name)?;
        let start = (offset as usize).min(blob.len());
        let end = (offset.saturating_add(len) as usize).min(blob.len());
        self.range_gets.fetch_add(1, Ordering::Relaxed);
        self.range_bytes
            .fetch_add((end - start) as u64, Ordering::Relaxed);
        Ok(blob[start..end].to_vec())
    }

    fn size(&self, container: &str, name: &str) -> Result<u64> {
        Ok(self.blob(container, name)?.len() as u64)
    }

    fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .blobs
            .read()
            .keys()
            .filter(|(c, n)| c == container && n.starts_with(prefix))
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_elements() {
        let body = "<EnumerationResults><Blobs><Blob><Name>a/1.tif</Name></Blob>\
                    <Blob><Name>a/2.tif</Name></Blob></Blobs><NextMarker /></EnumerationResults>";
        assert_eq!(xml_elements(body, "Name"), vec!["a/1.tif", "a/2.tif"]);
        assert!(xml_elements(body, "NextMarker").is_empty());
    }

    #[test]
    fn test_memory_store_ranges() {
        let store = MemoryBlobStore::new();
        store.put("c", "x/blob", (0u8..100).collect());
        assert_eq!(store.get_range("c", "x/blob", 10, 5).unwrap(), vec![10, 11, 12, 13, 14]);
        assert_eq!(store.get_range("c", "x/blob", 98, 10).unwrap(), vec![98, 99]);
        assert_eq!(store.size("c", "x/blob").unwrap(), 100);
        assert!(store.get("c", "missing").unwrap_err().is_not_found());
        assert_eq!(store.list("c", "x/").unwrap(), vec!["x/blob".to_string()]);
        assert!(store.list("c", "y/").unwrap().is_empty());

        let stats = store.stats();
        assert_eq!(stats.range_gets, 2);
        assert_eq!(stats.range_bytes, 7);
    }

    #[test]
    fn test_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("sentinel2-data").join("sentinel2_august");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("15TWG_20240829_B04.tif"), b"abcdef").unwrap();

        let store = LocalBlobStore::new(dir.path());
        let names = store.list("sentinel2-data", "sentinel2_august/").unwrap();
        assert_eq!(names, vec!["sentinel2_august/15TWG_20240829_B04.tif".to_string()]);
        assert_eq!(
            store.get_range("sentinel2-data", &names[0], 2, 3).unwrap(),
            b"cde".to_vec()
        );
        assert_eq!(store.size("sentinel2-data", &names[0]).unwrap(), 6);
        assert!(store
            .get("sentinel2-data", "sentinel2_august/none.tif")
            .unwrap_err()
            .is_not_found());
    }
}
