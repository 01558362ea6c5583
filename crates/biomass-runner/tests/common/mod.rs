//! A small county on disk: SQLite stores in a temp directory and GeoTIFFs
//! served from memory.
//!
//! The WorldCover fixture covers 0.02° around (-92.5, 42.0). West of
//! -92.50 it is forest with every tenth column grassland (90% forest);
//! east of it, cropland with every fifth column grassland (80% cropland).
//! Parcels sit north of 42° so they fall in the N42W093 cell.

#![allow(dead_code)]

use biomass_analysis::{Coefficients, VegetationThresholds};
use biomass_common::{Bounds, ForestPlot, Parcel, ParcelGeometry, PlotBiomass, StandAttributes};
use biomass_coords::CoordinateTransformer;
use biomass_runner::{CountyProcessor, ProcessingConfig};
use biomass_store::{SpatialStore, StoreConfig};
use biomass_tiles::{worldcover_path, Band, MemoryBlobStore, Period, TileConfig, TileManager};
use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder, TiffValue};
use tiff::tags::Tag;

pub const STATE: &str = "19";
pub const COUNTY: &str = "055";

// ============================================================================
// GeoTIFF Fixtures
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct GeoSpec {
    pub width: u32,
    pub height: u32,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
    pub epsg: u16,
}

/// 10 km of 10 m UTM zone 15N pixels around (-92.5, 42.0).
pub const UTM_SPEC: GeoSpec = GeoSpec {
    width: 1000,
    height: 1000,
    origin_x: 536_000.0,
    origin_y: 4_655_000.0,
    pixel_size: 10.0,
    epsg: 32615,
};

pub const WC_SPEC: GeoSpec = GeoSpec {
    width: 200,
    height: 200,
    origin_x: -92.51,
    origin_y: 42.01,
    pixel_size: 0.0001,
    epsg: 4326,
};

fn encode<C>(spec: &GeoSpec, data: &[C::Inner], nodata: Option<&str>) -> Vec<u8>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    let geographic = spec.epsg == 4326;
    let geo_keys: Vec<u16> = vec![
        1, 1, 0, 3,
        1024, 0, 1, if geographic { 2 } else { 1 },
        1025, 0, 1, 1,
        if geographic { 2048 } else { 3072 }, 0, 1, spec.epsg,
    ];
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder.new_image::<C>(spec.width, spec.height).unwrap();
        image.rows_per_strip(32).unwrap();
        let dir = image.encoder();
        dir.write_tag(
            Tag::from_u16_exhaustive(33550),
            &[spec.pixel_size, spec.pixel_size, 0.0][..],
        )
        .unwrap();
        dir.write_tag(
            Tag::from_u16_exhaustive(33922),
            &[0.0, 0.0, 0.0, spec.origin_x, spec.origin_y, 0.0][..],
        )
        .unwrap();
        dir.write_tag(Tag::from_u16_exhaustive(34735), &geo_keys[..])
            .unwrap();
        if let Some(nodata) = nodata {
            dir.write_tag(Tag::from_u16_exhaustive(42113), nodata).unwrap();
        }
        image.write_data(data).unwrap();
    }
    buf.into_inner()
}

fn band_path(band: Band) -> String {
    format!("sentinel2_august/15TWG_20240812_{}.tif", band.code())
}

/// Sentinel-2 bands (uniform vegetated reflectance) and the WorldCover
/// cell. Bands in `missing` are never uploaded, so fetching them 404s.
pub fn blobs(missing: &[Band]) -> Arc<MemoryBlobStore> {
    let store = Arc::new(MemoryBlobStore::new());
    let pixels = (UTM_SPEC.width * UTM_SPEC.height) as usize;
    for (band, value) in [
        (Band::Blue, 400u16),
        (Band::Green, 800),
        (Band::Red, 500),
        (Band::Nir, 3000),
    ] {
        if !missing.contains(&band) {
            let data = vec![value; pixels];
            store.put(
                "sentinel2-data",
                &band_path(band),
                encode::<colortype::Gray16>(&UTM_SPEC, &data, None),
            );
        }
    }

    let classes: Vec<u8> = (0..WC_SPEC.height)
        .flat_map(|_| {
            (0..WC_SPEC.width).map(|col| match (col < 100, col % 10 == 0, col % 5 == 0) {
                (true, true, _) => 30,
                (true, false, _) => 10,
                (false, _, true) => 30,
                (false, _, false) => 40,
            })
        })
        .collect();
    store.put(
        "worldcover-data",
        &worldcover_path("N42W093"),
        encode::<colortype::Gray8>(&WC_SPEC, &classes, Some("0")),
    );
    store
}

// ============================================================================
// Parcels and Inventory
// ============================================================================

pub fn parcel(id: &str, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Parcel {
    Parcel::new(
        id,
        STATE,
        COUNTY,
        ParcelGeometry::from_bounds(&Bounds::new(min_lon, min_lat, max_lon, max_lat)),
    )
}

/// Parcel A: 90% forest west of -92.50.
pub fn forest_parcel() -> Parcel {
    parcel("A", -92.509, 42.0005, -92.501, 42.0035)
}

/// Parcel B: 80% cropland east of -92.50, under a corn polygon.
pub fn corn_parcel() -> Parcel {
    parcel("B", -92.499, 42.0005, -92.491, 42.0035)
}

/// Parcel C: well away from every raster, crop polygon and plot.
pub fn empty_parcel() -> Parcel {
    parcel("C", -92.35, 42.05, -92.34, 42.06)
}

/// Up to seven forest strips north of parcel A.
pub fn forest_strips(n: usize) -> Vec<Parcel> {
    (0..n)
        .map(|i| {
            let south = 42.004 + 0.0008 * i as f64;
            parcel(&format!("S{i:02}"), -92.508, south, -92.502, south + 0.0006)
        })
        .collect()
}

pub fn plot(id: &str, lon: f64, lat: f64) -> ForestPlot {
    ForestPlot {
        plot_id: id.into(),
        lat,
        lon,
        inventory_year: Some(2019),
        distance_degrees: 0.0,
        biomass: Some(PlotBiomass {
            drybio_ag: 70.0,
            drybio_bg: 14.0,
            drybio_bole: 40.0,
            drybio_stem: 10.0,
            drybio_branch: 12.0,
            drybio_foliage: 3.0,
            drybio_stump: 2.0,
            ..PlotBiomass::default()
        }),
        stand: StandAttributes {
            stand_age: Some(48.0),
            forest_type_code: Some(503),
            ownership_group: Some(46),
            treatment_years: vec![],
        },
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SpatialStore>,
    pub blobs: Arc<MemoryBlobStore>,
}

impl Harness {
    /// Empty stores with the corn polygon and two FIA plots loaded.
    pub fn new(missing_bands: &[Band]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SpatialStore::open(&StoreConfig::in_directory(dir.path())).unwrap());
        store.initialize_schemas().unwrap();
        store
            .insert_crop_polygons(&[(
                1,
                ParcelGeometry::from_bounds(&Bounds::new(-92.4995, 42.0001, -92.4905, 42.0039)),
            )])
            .unwrap();
        store
            .insert_forest_plots(&[plot("P1", -92.505, 42.006), plot("P2", -92.52, 42.0)])
            .unwrap();
        Self {
            dir,
            store,
            blobs: blobs(missing_bands),
        }
    }

    pub fn with_parcels(self, parcels: &[Parcel]) -> Self {
        self.store.insert_parcels(parcels).unwrap();
        self
    }

    pub fn tiles(&self) -> Arc<TileManager> {
        Arc::new(TileManager::new(
            self.blobs.clone(),
            Arc::new(CoordinateTransformer::new()),
            TileConfig::default(),
        ))
    }

    pub fn processor(&self, config: ProcessingConfig, stop: Arc<AtomicBool>) -> CountyProcessor {
        CountyProcessor::new(
            self.store.clone(),
            self.tiles(),
            Arc::new(Coefficients::default()),
            VegetationThresholds::default(),
            config,
            stop,
        )
        .unwrap()
    }
}

pub fn test_config(batch_size: u64) -> ProcessingConfig {
    ProcessingConfig {
        batch_size,
        max_workers: 2,
        period: Period::August,
        reference_year: 2025,
        parcel_timeout_secs: 120,
        ..ProcessingConfig::default()
    }
}
