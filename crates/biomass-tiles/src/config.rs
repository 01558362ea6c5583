//! Tile acquisition settings.

use crate::blob::{BlobStore, HttpBlobStore, LocalBlobStore};
use crate::cache::DEFAULT_TILE_CACHE_SIZE;
use crate::raster::StreamLimits;
use crate::range_reader::DEFAULT_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where tile blobs come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlobBackend {
    /// Azure-style blob endpoint.
    Http {
        base_url: String,
        #[serde(default)]
        sas_token: Option<String>,
    },
    /// A directory holding one sub-directory per container.
    Local { root: PathBuf },
}

impl Default for BlobBackend {
    fn default() -> Self {
        BlobBackend::Local {
            root: PathBuf::from("data/blobs"),
        }
    }
}

impl BlobBackend {
    /// Construct the configured store.
    pub fn open(&self, timeout: Duration) -> crate::Result<Arc<dyn BlobStore>> {
        Ok(match self {
            BlobBackend::Http {
                base_url,
                sas_token,
            } => Arc::new(HttpBlobStore::new(base_url, sas_token.clone(), timeout)?),
            BlobBackend::Local { root } => Arc::new(LocalBlobStore::new(root)),
        })
    }
}

/// Tile manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    pub backend: BlobBackend,
    pub sentinel2_container: String,
    pub worldcover_container: String,
    /// Decoded full tiles kept in the LRU.
    pub cache_size: usize,
    /// Read parcel windows with range requests when small enough.
    pub streaming: bool,
    pub block_size: u64,
    /// Blocks kept by the shared range-read cache.
    pub block_cache_blocks: usize,
    pub max_window_bytes: u64,
    pub max_chunk_bytes: u64,
    pub buffer_pixels: u32,
    pub http_timeout_secs: u64,
}

impl Default for TileConfig {
    fn default() -> Self {
        let limits = StreamLimits::default();
        Self {
            backend: BlobBackend::default(),
            sentinel2_container: "sentinel2-data".to_string(),
            worldcover_container: "worldcover-data".to_string(),
            cache_size: DEFAULT_TILE_CACHE_SIZE,
            streaming: true,
            block_size: DEFAULT_BLOCK_SIZE,
            block_cache_blocks: 1024,
            max_window_bytes: limits.max_window_bytes,
            max_chunk_bytes: limits.max_chunk_bytes,
            buffer_pixels: limits.buffer_pixels,
            http_timeout_secs: 60,
        }
    }
}

impl TileConfig {
    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            max_window_bytes: self.max_window_bytes,
            max_chunk_bytes: self.max_chunk_bytes,
            buffer_pixels: self.buffer_pixels,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Open the configured blob store.
    pub fn open_store(&self) -> crate::Result<Arc<dyn BlobStore>> {
        self.backend.open(self.http_timeout())
    }
}
