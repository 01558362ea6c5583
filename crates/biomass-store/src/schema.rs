//! Table definitions for each logical store.

use crate::config::StoreKind;
use rusqlite::Connection;

/// Cadastral parcels. Geometry is WGS84 polygon WKB; the bounding-box
/// columns serve county extent queries.
pub const PARCELS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS parcels (
    parcel_id   TEXT NOT NULL,
    state_fips  TEXT NOT NULL,
    county_fips TEXT NOT NULL,
    geom        BLOB,
    min_lon     REAL,
    min_lat     REAL,
    max_lon     REAL,
    max_lat     REAL,
    PRIMARY KEY (state_fips, county_fips, parcel_id)
);
";

/// Cropland Data Layer polygons.
pub const CROPS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cdl_polygons (
    id        INTEGER PRIMARY KEY,
    crop_code INTEGER NOT NULL,
    geom      BLOB NOT NULL,
    min_lon   REAL NOT NULL,
    min_lat   REAL NOT NULL,
    max_lon   REAL NOT NULL,
    max_lat   REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cdl_polygons_bbox
    ON cdl_polygons (min_lon, max_lon, min_lat, max_lat);
";

/// FIA plots with optional plot-level dry biomass (tons/acre) and stand
/// condition columns, and live/dead tree records (dry pounds per tree).
pub const FORESTRY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fia_plots (
    plot_cn        TEXT PRIMARY KEY,
    lat            REAL,
    lon            REAL,
    invyr          INTEGER,
    drybio_ag      REAL,
    drybio_bg      REAL,
    drybio_bole    REAL,
    drybio_sawlog  REAL,
    drybio_stem    REAL,
    drybio_branch  REAL,
    drybio_foliage REAL,
    drybio_stump   REAL,
    stdage         REAL,
    fortypcd       INTEGER,
    owngrpcd       INTEGER,
    trtyr1         INTEGER,
    trtyr2         INTEGER,
    trtyr3         INTEGER
);
CREATE INDEX IF NOT EXISTS idx_fia_plots_lat_lon ON fia_plots (lat, lon);

CREATE TABLE IF NOT EXISTS fia_trees (
    tree_cn        TEXT PRIMARY KEY,
    plt_cn         TEXT NOT NULL,
    spcd           INTEGER,
    statuscd       INTEGER NOT NULL,
    dia            REAL,
    ht             REAL,
    tpa_unadj      REAL,
    drybio_ag      REAL,
    drybio_bg      REAL,
    drybio_bole    REAL,
    drybio_sawlog  REAL,
    drybio_stem    REAL,
    drybio_branch  REAL,
    drybio_foliage REAL,
    drybio_stump   REAL
);
CREATE INDEX IF NOT EXISTS idx_fia_trees_plot ON fia_trees (plt_cn);
";

/// Biomass results and county checkpoints.
pub const OUTPUT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS parcel_biomass_analysis (
    id                      INTEGER PRIMARY KEY,
    parcel_id               TEXT NOT NULL,
    county_fips             TEXT NOT NULL,
    total_acres             REAL NOT NULL,
    centroid_lon            REAL,
    centroid_lat            REAL,
    forest_acres            REAL NOT NULL DEFAULT 0,
    cropland_acres          REAL NOT NULL DEFAULT 0,
    other_acres             REAL NOT NULL DEFAULT 0,
    forest_percentage       REAL NOT NULL DEFAULT 0,
    cropland_percentage     REAL NOT NULL DEFAULT 0,
    forest_biomass_tons     REAL NOT NULL DEFAULT 0,
    forest_harvestable_tons REAL NOT NULL DEFAULT 0,
    forest_residue_tons     REAL NOT NULL DEFAULT 0,
    crop_yield_tons         REAL NOT NULL DEFAULT 0,
    crop_residue_tons       REAL NOT NULL DEFAULT 0,
    total_biomass_tons      REAL NOT NULL DEFAULT 0,
    ndvi                    REAL,
    evi                     REAL,
    savi                    REAL,
    ndwi                    REAL,
    confidence_score        REAL NOT NULL CHECK (confidence_score BETWEEN 0 AND 1),
    data_sources            TEXT NOT NULL,
    processing_timestamp    TEXT NOT NULL,
    landcover_analysis      TEXT,
    forest_analysis         TEXT,
    crop_analysis           TEXT,
    UNIQUE (parcel_id, processing_timestamp)
);
CREATE INDEX IF NOT EXISTS idx_biomass_county ON parcel_biomass_analysis (county_fips);

CREATE TABLE IF NOT EXISTS processing_checkpoints (
    county_fips          TEXT PRIMARY KEY,
    batch_num            INTEGER NOT NULL,
    parcel_offset        INTEGER NOT NULL,
    parcels_processed    INTEGER NOT NULL,
    parcels_skipped      INTEGER NOT NULL DEFAULT 0,
    errors_count         INTEGER NOT NULL,
    processing_timestamp TEXT NOT NULL,
    checkpoint_timestamp TEXT NOT NULL,
    status               TEXT NOT NULL DEFAULT 'in_progress'
);
";

pub fn schema_for(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::Parcels => PARCELS_SCHEMA,
        StoreKind::Crops => CROPS_SCHEMA,
        StoreKind::Forestry => FORESTRY_SCHEMA,
        StoreKind::Output => OUTPUT_SCHEMA,
    }
}

/// Create `kind`'s tables if missing.
pub fn initialize(conn: &Connection, kind: StoreKind) -> rusqlite::Result<()> {
    conn.execute_batch(schema_for(kind))
}
