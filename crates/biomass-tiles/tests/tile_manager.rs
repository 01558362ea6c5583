//! Tile manager tests against GeoTIFFs served from memory.

mod common;

use biomass_common::{Bounds, ParcelGeometry};
use biomass_coords::CoordinateTransformer;
use biomass_tiles::{
    worldcover_path, Band, BlobStore, MemoryBlobStore, Period, TileConfig, TileKind, TileManager,
};
use common::{filled, stripped_u16, stripped_u8, tiled_u16, GeoSpec};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const S2: &str = "sentinel2-data";
const WC: &str = "worldcover-data";

/// 10 km of 10 m UTM zone 15N pixels around (-92.5, 42.0).
const UTM_SPEC: GeoSpec = GeoSpec {
    width: 1000,
    height: 1000,
    origin_x: 536_000.0,
    origin_y: 4_655_000.0,
    pixel_size: 10.0,
    epsg: 32615,
};

/// 0.02° of WorldCover around (-92.5, 42.0); west half forest, east half cropland.
const WC_SPEC: GeoSpec = GeoSpec {
    width: 200,
    height: 200,
    origin_x: -92.51,
    origin_y: 42.01,
    pixel_size: 0.0001,
    epsg: 4326,
};

fn county() -> Bounds {
    Bounds::new(-92.6, 41.9, -92.4, 42.1)
}

/// About 830 m × 670 m around (-92.5, 42.0).
fn parcel() -> ParcelGeometry {
    ParcelGeometry::from_bounds(&Bounds::new(-92.505, 41.997, -92.495, 42.003))
}

struct Fixture {
    store: Arc<MemoryBlobStore>,
    file_bytes: usize,
}

fn band_path(band: Band) -> String {
    format!("sentinel2_august/15TWG_20240812_{}.tif", band.code())
}

/// Red is tiled, the other bands stripped; `skip` bands are not stored.
fn fixture(skip: &[Band]) -> Fixture {
    let store = Arc::new(MemoryBlobStore::new());
    let mut file_bytes = 0;
    for (band, value) in [
        (Band::Blue, 400u16),
        (Band::Green, 800),
        (Band::Red, 500),
        (Band::Nir, 3000),
    ] {
        if skip.contains(&band) {
            continue;
        }
        let data = filled(&UTM_SPEC, value);
        let bytes = if band == Band::Red {
            tiled_u16(&UTM_SPEC, &data, 64)
        } else {
            stripped_u16(&UTM_SPEC, &data, 16)
        };
        file_bytes += bytes.len();
        store.put(S2, &band_path(band), bytes);
    }

    let classes: Vec<u8> = (0..WC_SPEC.height)
        .flat_map(|_| (0..WC_SPEC.width).map(|col| if col < 100 { 10 } else { 40 }))
        .collect();
    store.put(WC, &worldcover_path("N42W093"), stripped_u8(&WC_SPEC, &classes));

    Fixture { store, file_bytes }
}

fn manager(fixture: &Fixture, config: TileConfig) -> TileManager {
    let tiles = TileManager::new(
        fixture.store.clone(),
        Arc::new(CoordinateTransformer::new()),
        config,
    );
    tiles
        .build_county_tile_index(&county(), Period::August)
        .unwrap();
    tiles
}

#[test]
fn test_index_without_downloading() {
    let fixture = fixture(&[]);
    let tiles = TileManager::new(
        fixture.store.clone(),
        Arc::new(CoordinateTransformer::new()),
        TileConfig::default(),
    );
    let entries = tiles
        .build_county_tile_index(&county(), Period::August)
        .unwrap();

    let sentinel: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == TileKind::Sentinel2)
        .collect();
    assert_eq!(sentinel.len(), 1);
    assert_eq!(sentinel[0].tile_id, "15TWG");
    assert_eq!(sentinel[0].epsg, 32615);
    assert_eq!(sentinel[0].acquisition_date.as_deref(), Some("20240812"));
    assert_eq!(sentinel[0].paths.len(), 4);
    assert!(sentinel[0].wgs84_bounds.contains_point(-92.5, 42.0));

    let cells: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == TileKind::WorldCover)
        .map(|e| e.tile_id.as_str())
        .collect();
    assert_eq!(cells, vec!["N39W093", "N42W093"]);

    let stats = fixture.store.stats();
    assert_eq!(stats.full_gets, 0);
    assert_eq!(stats.range_gets, 0);

    // Rebuilding replaces rather than accumulates.
    tiles
        .build_county_tile_index(&county(), Period::August)
        .unwrap();
    assert_eq!(tiles.index_entries().len(), entries.len());
}

#[test]
fn test_small_window_is_streamed() {
    let fixture = fixture(&[Band::Blue, Band::Green]);
    let tiles = manager(&fixture, TileConfig::default());

    let pixels = tiles
        .get_pixels_for_parcel(&parcel(), &[Band::Red, Band::Nir])
        .expect("parcel is covered");
    assert_eq!(pixels.tile_id, "15TWG");
    assert_eq!(pixels.acquisition_date.as_deref(), Some("20240812"));

    let red = pixels.band(Band::Red).unwrap();
    let nir = pixels.band(Band::Nir).unwrap();
    // About 83 × 67 pixels of 10 m fall inside the parcel.
    assert!(red.valid_count() > 4500 && red.valid_count() < 6500);
    assert_eq!(red.valid_count(), nir.valid_count());
    assert!(red.valid_values().all(|v| v == 500.0));
    assert!(nir.valid_values().all(|v| v == 3000.0));

    let stats = tiles.download_stats();
    assert_eq!(stats.window_reads, 2);
    assert_eq!(stats.full_downloads, 0);
    assert_eq!(tiles.cache_stats().entries, 0);

    let store_stats = fixture.store.stats();
    assert_eq!(store_stats.full_gets, 0);
    assert!(
        (store_stats.range_bytes as usize) < fixture.file_bytes / 2,
        "streamed {} of {} bytes",
        store_stats.range_bytes,
        fixture.file_bytes
    );
}

#[test]
fn test_large_window_fetches_full_tile_once() {
    let fixture = fixture(&[Band::Blue, Band::Green]);
    let config = TileConfig {
        max_window_bytes: 1000,
        ..TileConfig::default()
    };
    let tiles = manager(&fixture, config);

    let first = tiles
        .get_pixels_for_parcel(&parcel(), &[Band::Red, Band::Nir])
        .unwrap();
    assert_eq!(tiles.download_stats().full_downloads, 2);
    assert_eq!(tiles.download_stats().window_reads, 0);
    assert_eq!(tiles.cache_stats().entries, 2);

    // Second request is served from the cached full tiles.
    let second = tiles
        .get_pixels_for_parcel(&parcel(), &[Band::Red, Band::Nir])
        .unwrap();
    assert_eq!(first.tile_id, second.tile_id);
    assert_eq!(
        first.band(Band::Red).unwrap().valid_count(),
        second.band(Band::Red).unwrap().valid_count()
    );
    assert_eq!(fixture.store.stats().full_gets, 2);
    assert!(tiles.cache_stats().hits >= 2);

    tiles.clear_cache();
    assert_eq!(tiles.cache_stats().entries, 0);
    tiles
        .get_pixels_for_parcel(&parcel(), &[Band::Red])
        .unwrap();
    assert_eq!(fixture.store.stats().full_gets, 3);
}

#[test]
fn test_missing_band_is_left_out() {
    let fixture = fixture(&[Band::Blue]);
    let tiles = manager(&fixture, TileConfig::default());

    let pixels = tiles
        .get_pixels_for_parcel(&parcel(), &Band::ALL)
        .unwrap();
    assert!(pixels.band(Band::Blue).is_none());
    assert!(pixels.band(Band::Green).is_some());
    assert!(pixels.band(Band::Red).is_some());
    assert_eq!(tiles.download_stats().missing_tiles, 1);

    // The absent blob is not requested again.
    tiles
        .get_pixels_for_parcel(&parcel(), &Band::ALL)
        .unwrap();
    assert_eq!(tiles.download_stats().missing_tiles, 1);
}

#[test]
fn test_parcel_without_tiles_is_none() {
    let fixture = fixture(&[]);
    let tiles = manager(&fixture, TileConfig::default());
    let far = ParcelGeometry::from_bounds(&Bounds::new(-80.01, 35.0, -80.0, 35.01));
    assert!(tiles.get_pixels_for_parcel(&far, &Band::ALL).is_none());
    assert!(tiles.get_world_cover_pixels_for_parcel(&far).is_none());
}

#[test]
fn test_worldcover_forest_share() {
    let fixture = fixture(&[]);
    let tiles = manager(&fixture, TileConfig::default());

    let counts = tiles.world_cover_class_counts(&parcel()).unwrap();
    assert_eq!(counts.count(10), counts.count(40));

    let wc_parcel = ParcelGeometry::from_bounds(&Bounds::new(-92.505, 41.995, -92.495, 42.005));
    let summary = tiles.get_world_cover_pixels_for_parcel(&wc_parcel).unwrap();
    assert_eq!(summary.total_pixel_count, 10_000);
    assert_eq!(summary.forest_pixel_count, 5_000);
    assert!((summary.forest_percent - 50.0).abs() < 1e-9);
    assert!((summary.forest_area_acres - 5_000.0 * 100.0 * 0.000247105).abs() < 1e-6);
}

#[test]
fn test_concurrent_requests_share_one_download() {
    let fixture = fixture(&[Band::Blue, Band::Green, Band::Nir]);
    let config = TileConfig {
        streaming: false,
        ..TileConfig::default()
    };
    let tiles = manager(&fixture, config);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let pixels = tiles.get_pixels_for_parcel(&parcel(), &[Band::Red]);
                assert!(pixels.is_some());
            });
        }
    });
    assert_eq!(fixture.store.stats().full_gets, 1);
    assert_eq!(tiles.download_stats().full_downloads, 1);
}

/// Serves blobs from memory, but whole-blob fetches of WorldCover panic.
struct PanicOnWorldCover(Arc<MemoryBlobStore>);

impl BlobStore for PanicOnWorldCover {
    fn get(&self, container: &str, name: &str) -> biomass_tiles::Result<Vec<u8>> {
        if container == WC {
            panic!("decoder blew up on {name}");
        }
        self.0.get(container, name)
    }

    fn get_range(
        &self,
        container: &str,
        name: &str,
        offset: u64,
        len: u64,
    ) -> biomass_tiles::Result<Vec<u8>> {
        self.0.get_range(container, name, offset, len)
    }

    fn size(&self, container: &str, name: &str) -> biomass_tiles::Result<u64> {
        self.0.size(container, name)
    }

    fn list(&self, container: &str, prefix: &str) -> biomass_tiles::Result<Vec<String>> {
        self.0.list(container, prefix)
    }
}

#[test]
fn test_panicked_download_releases_waiters() {
    let fixture = fixture(&[]);
    let tiles = Arc::new(TileManager::new(
        Arc::new(PanicOnWorldCover(fixture.store.clone())),
        Arc::new(CoordinateTransformer::new()),
        TileConfig {
            streaming: false,
            ..TileConfig::default()
        },
    ));
    tiles
        .build_county_tile_index(&county(), Period::August)
        .unwrap();

    let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        tiles.world_cover_class_counts(&parcel())
    }));
    assert!(first.is_err());

    // A later request for the same tile must come back rather than wait.
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(&tiles);
    std::thread::spawn(move || {
        let _ = tx.send(worker.world_cover_class_counts(&parcel()).is_none());
    });
    let degraded = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("second request for the tile never returned");
    assert!(degraded);
    assert_eq!(tiles.download_stats().failures, 1);

    // Clearing forgets the failure, so the next county tries again.
    tiles.clear_cache();
    let retry = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        tiles.world_cover_class_counts(&parcel())
    }));
    assert!(retry.is_err());
}
