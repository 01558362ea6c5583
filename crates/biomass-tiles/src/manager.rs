//! County tile index and parcel pixel access.
//!
//! The manager never downloads tiles up front. [`TileManager::build_county_tile_index`]
//! only lists blob names and derives storage paths; pixels are fetched the
//! first time a parcel needs them. Small parcel windows are streamed with
//! range requests, larger ones fetch and decode the full tile into the LRU
//! cache. Missing tiles are remembered until [`TileManager::clear_cache`] so
//! a county run asks for each absent blob once.

use crate::blob::BlobStore;
use crate::cache::{CacheStats, TileCache};
use crate::clip::{class_counts, clip_band, ClassCounts, ParcelPixels, WorldCoverSummary};
use crate::config::TileConfig;
use crate::index::{
    available_sentinel2_tiles, sentinel2_path, worldcover_cell_bounds, worldcover_path, Band,
    Layer, Period, TileIndexEntry, TileKind,
};
use crate::range_reader::{BlobRangeReader, BlockCache};
use crate::raster::{Raster, StreamLimits, WindowRead};
use crate::{Result, TileError};
use biomass_common::{Bounds, ParcelGeometry};
use biomass_coords::{CoordinateTransformer, WGS84_EPSG};
use biomass_metrics::metric_defs;
use geo::{Coord, MapCoords, MultiPolygon};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status of a full-tile download.
#[derive(Clone)]
enum DownloadStatus {
    /// Another thread is fetching and decoding the tile.
    InProgress,
    /// The fetch failed; the tile is treated as absent until the cache is cleared.
    Failed { not_found: bool, reason: String },
}

/// Tracks in-flight and failed downloads by cache key.
struct DownloadTracker {
    status: HashMap<String, DownloadStatus>,
}

impl DownloadTracker {
    fn new() -> Self {
        Self {
            status: HashMap::new(),
        }
    }
}

/// Download statistics since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Full tiles fetched and decoded.
    pub full_downloads: u64,
    /// Parcel windows served by range requests.
    pub window_reads: u64,
    /// Bytes fetched from storage, full tiles and range blocks together.
    pub bytes_downloaded: u64,
    /// Blobs that turned out not to exist.
    pub missing_tiles: u64,
    /// Fetches that failed for other reasons.
    pub failures: u64,
}

/// Manages the tile index, decoded tile cache and parcel pixel requests.
///
/// Shared across worker threads; all methods take `&self`.
pub struct TileManager {
    store: Arc<dyn BlobStore>,
    transformer: Arc<CoordinateTransformer>,
    config: TileConfig,
    limits: StreamLimits,
    cache: TileCache,
    blocks: BlockCache,
    /// Current county's tiles keyed by tile ID.
    index: RwLock<BTreeMap<String, TileIndexEntry>>,
    downloads: Mutex<DownloadTracker>,
    download_complete: Condvar,
    full_downloads: AtomicU64,
    full_bytes: AtomicU64,
    window_reads: AtomicU64,
    missing_tiles: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("indexed_tiles", &self.index.read().len())
            .field("cache", &self.cache)
            .field("blocks", &self.blocks)
            .finish()
    }
}

impl TileManager {
    pub fn new(
        store: Arc<dyn BlobStore>,
        transformer: Arc<CoordinateTransformer>,
        config: TileConfig,
    ) -> Self {
        Self {
            store,
            transformer,
            limits: config.stream_limits(),
            cache: TileCache::new(config.cache_size),
            blocks: BlockCache::new(config.block_size, config.block_cache_blocks),
            config,
            index: RwLock::new(BTreeMap::new()),
            downloads: Mutex::new(DownloadTracker::new()),
            download_complete: Condvar::new(),
            full_downloads: AtomicU64::new(0),
            full_bytes: AtomicU64::new(0),
            window_reads: AtomicU64::new(0),
            missing_tiles: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Index the Sentinel-2 and WorldCover tiles a county may need.
    ///
    /// Lists the period folder to learn which tile IDs exist, keeps the ones
    /// whose zone and band are near `county_bounds`, and adds every
    /// WorldCover cell overlapping the bounds. Nothing is downloaded.
    /// Replaces any previous index.
    pub fn build_county_tile_index(
        &self,
        county_bounds: &Bounds,
        period: Period,
    ) -> Result<Vec<TileIndexEntry>> {
        let container = &self.config.sentinel2_container;
        let prefix = format!("{}/", period.folder());
        let names = match self.store.list(container, &prefix) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => {
                warn!("No Sentinel-2 listing for {}/{}", container, prefix);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let available = available_sentinel2_tiles(&names);
        let ids: Vec<&String> = available.keys().collect();

        let mut entries = BTreeMap::new();
        for tile in self
            .transformer
            .sentinel2_tiles_for_bounds(county_bounds, &ids)
        {
            let date = available
                .get(&tile.id)
                .cloned()
                .unwrap_or_else(|| crate::index::DEFAULT_ACQUISITION_DATE.to_string());
            let paths = Band::ALL
                .iter()
                .map(|&band| {
                    (
                        Layer::Band(band),
                        sentinel2_path(period, &tile.id, &date, band),
                    )
                })
                .collect();
            let entry = TileIndexEntry {
                tile_id: tile.id.clone(),
                kind: TileKind::Sentinel2,
                container: container.clone(),
                paths,
                wgs84_bounds: tile.wgs84_bounds(&self.transformer),
                epsg: tile.epsg(),
                acquisition_date: Some(date),
            };
            entries.insert(entry.tile_id.clone(), entry);
        }

        for cell in self.transformer.worldcover_tiles_for_bounds(county_bounds) {
            let Some(bounds) = worldcover_cell_bounds(&cell) else {
                continue;
            };
            let mut paths = BTreeMap::new();
            paths.insert(Layer::LandCover, worldcover_path(&cell));
            let entry = TileIndexEntry {
                tile_id: cell,
                kind: TileKind::WorldCover,
                container: self.config.worldcover_container.clone(),
                paths,
                wgs84_bounds: bounds,
                epsg: WGS84_EPSG,
                acquisition_date: None,
            };
            entries.insert(entry.tile_id.clone(), entry);
        }

        info!(
            "Indexed {} Sentinel-2 and {} WorldCover tiles for {:?}",
            entries
                .values()
                .filter(|e| e.kind == TileKind::Sentinel2)
                .count(),
            entries
                .values()
                .filter(|e| e.kind == TileKind::WorldCover)
                .count(),
            county_bounds
        );
        let list: Vec<TileIndexEntry> = entries.values().cloned().collect();
        *self.index.write() = entries;
        Ok(list)
    }

    /// Every indexed tile, ordered by tile ID.
    pub fn index_entries(&self) -> Vec<TileIndexEntry> {
        self.index.read().values().cloned().collect()
    }

    /// Indexed tiles of `kind` whose WGS84 bounds touch `bounds`.
    pub fn tiles_for_bounds(&self, bounds: &Bounds, kind: TileKind) -> Vec<TileIndexEntry> {
        self.index
            .read()
            .values()
            .filter(|e| e.kind == kind && self.transformer.bounds_intersect(&e.wgs84_bounds, bounds))
            .cloned()
            .collect()
    }

    /// Sentinel-2 pixels under a parcel, or `None` when no indexed tile has
    /// data there.
    ///
    /// When several tiles cover the parcel, the one with the most valid
    /// clipped pixels supplies every band. A band whose blob is missing is
    /// left out of the result.
    pub fn get_pixels_for_parcel(
        &self,
        geometry: &ParcelGeometry,
        bands: &[Band],
    ) -> Option<ParcelPixels> {
        let bounds = geometry.bounds()?;
        let mut best: Option<ParcelPixels> = None;

        for entry in self.tiles_for_bounds(&bounds, TileKind::Sentinel2) {
            let Some(shape) = self.shape_in_crs(geometry, entry.epsg) else {
                continue;
            };
            let Some(native_bounds) = native_bounds(&shape) else {
                continue;
            };

            let mut pixels = ParcelPixels {
                tile_id: entry.tile_id.clone(),
                acquisition_date: entry.acquisition_date.clone(),
                bands: BTreeMap::new(),
            };
            for &band in bands {
                if let Some(raster) = self.read_layer(&entry, Layer::Band(band), &native_bounds) {
                    let clipped = clip_band(&raster, &shape);
                    if clipped.valid_count() > 0 {
                        pixels.bands.insert(band, clipped);
                    }
                }
            }

            let count = pixels.valid_pixel_count();
            if count > 0
                && best
                    .as_ref()
                    .map_or(true, |b| count > b.valid_pixel_count())
            {
                best = Some(pixels);
            }
        }

        if best.is_none() {
            debug!("No Sentinel-2 pixels for parcel bounds {:?}", bounds);
        }
        best
    }

    /// WorldCover class histogram under a parcel, summed over every cell
    /// the parcel touches. `None` when no cell has data there.
    pub fn world_cover_class_counts(&self, geometry: &ParcelGeometry) -> Option<ClassCounts> {
        let bounds = geometry.bounds()?;
        let mut counts = ClassCounts::new();
        for entry in self.tiles_for_bounds(&bounds, TileKind::WorldCover) {
            let Some(shape) = self.shape_in_crs(geometry, entry.epsg) else {
                continue;
            };
            let Some(native_bounds) = native_bounds(&shape) else {
                continue;
            };
            if let Some(raster) = self.read_layer(&entry, Layer::LandCover, &native_bounds) {
                counts.merge(&class_counts(&raster, &shape));
            }
        }
        if counts.is_empty() {
            None
        } else {
            Some(counts)
        }
    }

    /// Forest pixel summary under a parcel.
    pub fn get_world_cover_pixels_for_parcel(
        &self,
        geometry: &ParcelGeometry,
    ) -> Option<WorldCoverSummary> {
        self.world_cover_class_counts(geometry)
            .and_then(|counts| WorldCoverSummary::from_counts(&counts))
    }

    /// Release every decoded tile, cached block and remembered failure.
    /// The index is kept.
    pub fn clear_cache(&self) {
        let stats = self.cache.stats();
        self.cache.clear();
        self.blocks.clear();
        self.downloads.lock().status.clear();
        self.download_complete.notify_all();
        info!(
            "Cleared tile cache ({} tiles, {} hits, {} misses)",
            stats.entries, stats.hits, stats.misses
        );
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            full_downloads: self.full_downloads.load(Ordering::Relaxed),
            window_reads: self.window_reads.load(Ordering::Relaxed),
            bytes_downloaded: self.full_bytes.load(Ordering::Relaxed) + self.blocks.bytes_fetched(),
            missing_tiles: self.missing_tiles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Parcel polygon reprojected into `epsg`.
    fn shape_in_crs(&self, geometry: &ParcelGeometry, epsg: u32) -> Option<MultiPolygon<f64>> {
        if epsg == WGS84_EPSG {
            return Some(geometry.shape().clone());
        }
        let transformer = self.transformer.as_ref();
        geometry
            .shape()
            .try_map_coords(|c| {
                transformer
                    .transform_point(WGS84_EPSG, epsg, c.x, c.y)
                    .map(|(x, y)| Coord { x, y })
            })
            .map_err(|e| warn!("Cannot project parcel into EPSG:{}: {}", epsg, e))
            .ok()
    }

    /// Pixels of one layer covering `bounds` (in the tile's CRS).
    ///
    /// Order of preference: a cached full tile, a streamed window, then a
    /// full fetch that populates the cache. Failures degrade to `None`.
    fn read_layer(
        &self,
        entry: &TileIndexEntry,
        layer: Layer,
        bounds: &Bounds,
    ) -> Option<Arc<Raster>> {
        let key = entry.cache_key(layer)?;
        let path = entry.paths.get(&layer)?;

        if self.known_failure(&key) {
            return None;
        }
        if let Some(raster) = self.cache.get(&key) {
            return Some(raster);
        }

        if self.config.streaming {
            match self.read_window(&entry.container, path, bounds, entry.epsg) {
                Ok(WindowRead::Raster(raster)) => {
                    self.window_reads.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_defs::TILE_WINDOW_READS.name).increment(1);
                    return Some(Arc::new(raster));
                }
                Ok(WindowRead::Outside) => return None,
                Ok(WindowRead::TooLarge {
                    window_bytes,
                    chunk_bytes,
                }) => {
                    debug!(
                        "Window of {} too large to stream ({} window bytes, {} chunk bytes)",
                        key, window_bytes, chunk_bytes
                    );
                }
                Err(e) if e.is_not_found() => {
                    self.record_failure(&key, &e);
                    return None;
                }
                Err(e) => {
                    debug!("Streaming {} failed, fetching full tile: {}", key, e);
                }
            }
        }

        match self.fetch_full(&entry.container, path, &key, entry.epsg) {
            Ok(raster) => Some(raster),
            Err(e) => {
                if e.is_not_found() {
                    debug!("Tile {} not found", key);
                } else {
                    warn!("Tile {} unavailable: {}", key, e);
                }
                None
            }
        }
    }

    fn known_failure(&self, key: &str) -> bool {
        matches!(
            self.downloads.lock().status.get(key),
            Some(DownloadStatus::Failed { .. })
        )
    }

    fn record_failure(&self, key: &str, error: &TileError) {
        let not_found = error.is_not_found();
        if not_found {
            self.missing_tiles.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!(metric_defs::TILE_DOWNLOAD_FAILURES.name, "not_found" => not_found.to_string())
            .increment(1);
        self.downloads.lock().status.insert(
            key.to_string(),
            DownloadStatus::Failed {
                not_found,
                reason: error.to_string(),
            },
        );
    }

    fn read_window(
        &self,
        container: &str,
        path: &str,
        bounds: &Bounds,
        epsg: u32,
    ) -> Result<WindowRead> {
        let reader = BlobRangeReader::open(self.store.as_ref(), &self.blocks, container, path)?;
        Raster::read_window(reader, bounds, &self.limits, epsg)
    }

    /// Fetch and decode a full tile, coordinating with other threads so a
    /// tile is downloaded once.
    fn fetch_full(
        &self,
        container: &str,
        path: &str,
        key: &str,
        fallback_epsg: u32,
    ) -> Result<Arc<Raster>> {
        loop {
            let mut tracker = self.downloads.lock();
            match tracker.status.get(key) {
                Some(DownloadStatus::InProgress) => {
                    // Another thread is downloading this tile, wait for it
                    self.download_complete.wait(&mut tracker);
                    continue;
                }
                Some(DownloadStatus::Failed { not_found, reason }) => {
                    return Err(if *not_found {
                        TileError::NotFound {
                            container: container.to_string(),
                            name: path.to_string(),
                        }
                    } else {
                        TileError::DownloadFailed {
                            container: container.to_string(),
                            name: path.to_string(),
                            reason: reason.clone(),
                        }
                    });
                }
                None => {
                    // Check the cache again (might have been loaded while we waited)
                    if let Some(raster) = self.cache.get(key) {
                        return Ok(raster);
                    }
                    tracker
                        .status
                        .insert(key.to_string(), DownloadStatus::InProgress);
                    break;
                }
            }
        }

        let _pending = PendingDownload { manager: self, key };
        let result = self.download_and_decode(container, path, fallback_epsg);

        match &result {
            Ok(raster) => {
                self.cache.insert(key.to_string(), Arc::clone(raster));
                self.downloads.lock().status.remove(key);
            }
            Err(e) => {
                self.downloads.lock().status.remove(key);
                self.record_failure(key, e);
            }
        }
        result
    }

    fn download_and_decode(
        &self,
        container: &str,
        path: &str,
        fallback_epsg: u32,
    ) -> Result<Arc<Raster>> {
        let bytes = self.store.get(container, path)?;
        self.full_downloads.fetch_add(1, Ordering::Relaxed);
        self.full_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        metrics::counter!(metric_defs::TILE_FULL_DOWNLOADS.name).increment(1);
        metrics::counter!(metric_defs::TILE_BYTES_DOWNLOADED.name).increment(bytes.len() as u64);

        let raster = Raster::from_bytes(&bytes, fallback_epsg)?;
        debug!(
            "Decoded {}/{} ({}x{}, {} MB)",
            container,
            path,
            raster.dimensions().0,
            raster.dimensions().1,
            raster.memory_bytes() / (1024 * 1024)
        );
        Ok(Arc::new(raster))
    }
}

/// Wakes threads waiting on a download when the downloading thread leaves
/// `fetch_full`, including by unwinding. A tile still marked in progress at
/// that point is remembered as failed.
struct PendingDownload<'a> {
    manager: &'a TileManager,
    key: &'a str,
}

impl Drop for PendingDownload<'_> {
    fn drop(&mut self) {
        let mut tracker = self.manager.downloads.lock();
        if matches!(tracker.status.get(self.key), Some(DownloadStatus::InProgress)) {
            warn!("Download of {} aborted by a panic", self.key);
            self.manager.failures.fetch_add(1, Ordering::Relaxed);
            tracker.status.insert(
                self.key.to_string(),
                DownloadStatus::Failed {
                    not_found: false,
                    reason: "download panicked".to_string(),
                },
            );
        }
        drop(tracker);
        self.manager.download_complete.notify_all();
    }
}

/// Bounding box of a projected shape.
fn native_bounds(shape: &MultiPolygon<f64>) -> Option<Bounds> {
    use geo::BoundingRect;
    shape.bounding_rect().map(Bounds::from)
}
