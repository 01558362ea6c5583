//! Bounded LRU of decoded tiles.

use crate::raster::Raster;
use biomass_metrics::metric_defs;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default number of decoded tiles held in memory.
pub const DEFAULT_TILE_CACHE_SIZE: usize = 50;

/// Hit/miss/eviction counts since creation or the last [`TileCache::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// LRU cache of decoded tiles keyed by `container/path`.
///
/// A single lock guards the recency order; decoding happens before
/// [`TileCache::insert`] is called, outside the lock.
pub struct TileCache {
    entries: Mutex<LruCache<String, Arc<Raster>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_CACHE_SIZE)
    }
}

impl TileCache {
    /// Create a cache holding at most `capacity` tiles (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a tile and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Raster>> {
        let found = self.entries.lock().get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_defs::TILE_CACHE_HITS.name).increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_defs::TILE_CACHE_MISSES.name).increment(1);
        }
        found
    }

    /// Check presence without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    /// Insert a tile as most recently used. Returns the key evicted to make
    /// room, if any.
    pub fn insert(&self, key: String, raster: Arc<Raster>) -> Option<String> {
        let displaced = self.entries.lock().push(key.clone(), raster);
        match displaced {
            Some((old_key, _)) if old_key != key => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(metric_defs::TILE_CACHE_EVICTIONS.name).increment(1);
                debug!("Evicted tile {}", old_key);
                Some(old_key)
            }
            _ => None,
        }
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every tile and reset the counters.
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }
}
