//! The spatial store: parcel paging, crop overlay, FIA lookups, results
//! and checkpoints.

use crate::config::{StoreConfig, StoreKind};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::{schema, Result, StoreError};
use biomass_common::{
    BiomassRecord, Bounds, Checkpoint, CheckpointStatus, CropIntersection, DataSource, ForestPlot,
    IndexValues, Parcel, ParcelGeometry, PlotBiomass, StandAttributes, TreeRecord, M2_PER_ACRE,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

/// CDL codes that are never agricultural: open water, perennial ice/snow,
/// the four developed classes and barren land.
pub const NON_AGRICULTURAL_CODES: [i32; 7] = [111, 112, 121, 122, 123, 124, 131];

/// Most plots returned by a nearest-plot query.
pub const MAX_NEARBY_PLOTS: usize = 50;

/// FIA status code of a live tree.
pub const LIVE_TREE_STATUS: i32 = 1;

/// Plot ids bound per tree query.
const TREE_QUERY_CHUNK: usize = 500;

/// Row counts across the stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub parcels: u64,
    pub crop_polygons: u64,
    pub forest_plots: u64,
    pub trees: u64,
    pub biomass_records: u64,
    pub checkpoints: u64,
}

/// Format a timestamp the way it is keyed in the output tables.
pub fn timestamp_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_error<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Type::Text, e))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| conversion_error(idx, Type::Text, e)))
        .transpose()
}

fn json_text<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

fn count(conn: &PooledConnection<'_>, sql: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
    Ok(n.max(0) as u64)
}

const PLOT_COLUMNS: &str = "plot_cn, lat, lon, invyr, drybio_ag, drybio_bg, drybio_bole, \
    drybio_sawlog, drybio_stem, drybio_branch, drybio_foliage, drybio_stump, stdage, fortypcd, \
    owngrpcd, trtyr1, trtyr2, trtyr3";

const TREE_COLUMNS: &str = "tree_cn, plt_cn, spcd, statuscd, dia, ht, tpa_unadj, drybio_ag, \
    drybio_bg, drybio_bole, drybio_sawlog, drybio_stem, drybio_branch, drybio_foliage, drybio_stump";

const RESULT_COLUMNS: &str = "parcel_id, county_fips, total_acres, centroid_lon, centroid_lat, \
    forest_acres, cropland_acres, other_acres, forest_percentage, cropland_percentage, \
    forest_biomass_tons, forest_harvestable_tons, forest_residue_tons, crop_yield_tons, \
    crop_residue_tons, total_biomass_tons, ndvi, evi, savi, ndwi, confidence_score, data_sources, \
    processing_timestamp, landcover_analysis, forest_analysis, crop_analysis";

const CHECKPOINT_COLUMNS: &str = "county_fips, batch_num, parcel_offset, parcels_processed, \
    parcels_skipped, errors_count, status, processing_timestamp, checkpoint_timestamp";

/// Treatment years of 0 or 9999 mean "none recorded".
fn treatment_year(year: Option<i32>) -> Option<i32> {
    year.filter(|y| *y > 0 && *y < 9999)
}

fn plot_from_row(row: &Row<'_>, distance_degrees: f64) -> rusqlite::Result<ForestPlot> {
    let drybio_ag: Option<f64> = row.get(4)?;
    let component = |idx: usize| -> rusqlite::Result<f64> {
        Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0))
    };
    let biomass = match drybio_ag {
        Some(ag) => Some(PlotBiomass {
            drybio_ag: ag,
            drybio_bg: component(5)?,
            drybio_bole: component(6)?,
            drybio_sawlog: component(7)?,
            drybio_stem: component(8)?,
            drybio_branch: component(9)?,
            drybio_foliage: component(10)?,
            drybio_stump: component(11)?,
        }),
        None => None,
    };
    let treatment_years = [15, 16, 17]
        .into_iter()
        .map(|idx| row.get::<_, Option<i32>>(idx).map(treatment_year))
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    Ok(ForestPlot {
        plot_id: row.get(0)?,
        lat: row.get(1)?,
        lon: row.get(2)?,
        inventory_year: row.get(3)?,
        distance_degrees,
        biomass,
        stand: StandAttributes {
            stand_age: row.get(12)?,
            forest_type_code: row.get(13)?,
            ownership_group: row.get(14)?,
            treatment_years,
        },
    })
}

fn tree_from_row(row: &Row<'_>) -> rusqlite::Result<TreeRecord> {
    let component = |idx: usize| -> rusqlite::Result<f64> {
        Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0))
    };
    Ok(TreeRecord {
        tree_id: row.get(0)?,
        plot_id: row.get(1)?,
        species_code: row.get(2)?,
        status_code: row.get(3)?,
        dia: row.get(4)?,
        ht: row.get(5)?,
        tpa_unadj: row.get(6)?,
        drybio_ag: component(7)?,
        drybio_bg: component(8)?,
        drybio_bole: component(9)?,
        drybio_sawlog: component(10)?,
        drybio_stem: component(11)?,
        drybio_branch: component(12)?,
        drybio_foliage: component(13)?,
        drybio_stump: component(14)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<BiomassRecord> {
    let data_sources: Option<Vec<DataSource>> = json_column(row, 21)?;
    Ok(BiomassRecord {
        parcel_id: row.get(0)?,
        county_fips: row.get(1)?,
        total_acres: row.get(2)?,
        centroid_lon: row.get::<_, Option<f64>>(3)?.unwrap_or(f64::NAN),
        centroid_lat: row.get::<_, Option<f64>>(4)?.unwrap_or(f64::NAN),
        forest_acres: row.get(5)?,
        cropland_acres: row.get(6)?,
        other_acres: row.get(7)?,
        forest_percentage: row.get(8)?,
        cropland_percentage: row.get(9)?,
        forest_biomass_tons: row.get(10)?,
        forest_harvestable_tons: row.get(11)?,
        forest_residue_tons: row.get(12)?,
        crop_yield_tons: row.get(13)?,
        crop_residue_tons: row.get(14)?,
        total_biomass_tons: row.get(15)?,
        indices: IndexValues {
            ndvi: row.get(16)?,
            evi: row.get(17)?,
            savi: row.get(18)?,
            ndwi: row.get(19)?,
        },
        confidence_score: row.get(20)?,
        data_sources: data_sources.unwrap_or_default(),
        processing_timestamp: timestamp_column(row, 22)?,
        landcover_analysis: json_column(row, 23)?,
        forest_analysis: json_column(row, 24)?,
        crop_analysis: json_column(row, 25)?,
    })
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    let status_text: String = row.get(6)?;
    let status = CheckpointStatus::parse(&status_text).ok_or_else(|| {
        conversion_error(
            6,
            Type::Text,
            StoreError::InvalidValue(format!("checkpoint status {status_text:?}")),
        )
    })?;
    Ok(Checkpoint {
        county_fips: row.get(0)?,
        batch_num: row.get(1)?,
        parcel_offset: row.get::<_, i64>(2)?.max(0) as u64,
        parcels_processed: row.get::<_, i64>(3)?.max(0) as u64,
        parcels_skipped: row.get::<_, i64>(4)?.max(0) as u64,
        errors_count: row.get::<_, i64>(5)?.max(0) as u64,
        status,
        processing_timestamp: timestamp_column(row, 7)?,
        checkpoint_timestamp: timestamp_column(row, 8)?,
    })
}

/// Pooled access to the parcel, crop, forest inventory and output stores.
///
/// Constructed once per process and shared by reference; every method
/// checks out a connection for the duration of the call only.
#[derive(Debug)]
pub struct SpatialStore {
    parcels: ConnectionPool,
    crops: ConnectionPool,
    forestry: ConnectionPool,
    output: ConnectionPool,
}

impl SpatialStore {
    /// Open all four pools. Any failure here aborts the run.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let pool = |kind: StoreKind| ConnectionPool::open(kind, config.settings(kind).resolve(kind));
        Ok(Self {
            parcels: pool(StoreKind::Parcels)?,
            crops: pool(StoreKind::Crops)?,
            forestry: pool(StoreKind::Forestry)?,
            output: pool(StoreKind::Output)?,
        })
    }

    pub fn pool(&self, kind: StoreKind) -> &ConnectionPool {
        match kind {
            StoreKind::Parcels => &self.parcels,
            StoreKind::Crops => &self.crops,
            StoreKind::Forestry => &self.forestry,
            StoreKind::Output => &self.output,
        }
    }

    /// Check out a connection to `kind`, released when the guard drops.
    pub fn get_connection(&self, kind: StoreKind) -> Result<PooledConnection<'_>> {
        self.pool(kind).acquire()
    }

    /// Create every store's tables if missing.
    pub fn initialize_schemas(&self) -> Result<()> {
        for kind in StoreKind::ALL {
            let conn = self.get_connection(kind)?;
            schema::initialize(&conn, kind)?;
            debug!(store = %kind, "Schema ready");
        }
        Ok(())
    }

    /// Row counts for status reporting.
    pub fn database_stats(&self) -> Result<DatabaseStats> {
        let parcels = self.get_connection(StoreKind::Parcels)?;
        let crops = self.get_connection(StoreKind::Crops)?;
        let forestry = self.get_connection(StoreKind::Forestry)?;
        let output = self.get_connection(StoreKind::Output)?;
        Ok(DatabaseStats {
            parcels: count(&parcels, "SELECT COUNT(*) FROM parcels WHERE geom IS NOT NULL")?,
            crop_polygons: count(&crops, "SELECT COUNT(*) FROM cdl_polygons")?,
            forest_plots: count(&forestry, "SELECT COUNT(*) FROM fia_plots")?,
            trees: count(&forestry, "SELECT COUNT(*) FROM fia_trees")?,
            biomass_records: count(&output, "SELECT COUNT(*) FROM parcel_biomass_analysis")?,
            checkpoints: count(&output, "SELECT COUNT(*) FROM processing_checkpoints")?,
        })
    }

    // ------------------------------------------------------------------
    // Parcels
    // ------------------------------------------------------------------

    /// Extent of a county's parcels, or `None` when it has none.
    pub fn get_county_bounds(&self, state_fips: &str, county_fips: &str) -> Result<Option<Bounds>> {
        let conn = self.get_connection(StoreKind::Parcels)?;
        let extent: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) = conn.query_row(
            "SELECT MIN(min_lon), MIN(min_lat), MAX(max_lon), MAX(max_lat)
             FROM parcels
             WHERE state_fips = ?1 AND county_fips = ?2 AND geom IS NOT NULL",
            params![state_fips, county_fips],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
        Ok(match extent {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => {
                Some(Bounds::new(min_x, min_y, max_x, max_y))
            }
            _ => None,
        })
    }

    /// One page of a county's parcels ordered by `parcel_id`.
    ///
    /// Parcels at or below `min_area_acres` are filtered before paging, so
    /// consecutive `offset` windows tile the filtered set exactly. Rows whose
    /// geometry does not decode are returned with an empty geometry for the
    /// caller to skip as invalid.
    pub fn get_county_parcels(
        &self,
        state_fips: &str,
        county_fips: &str,
        offset: u64,
        limit: Option<u64>,
        min_area_acres: f64,
    ) -> Result<Vec<Parcel>> {
        let conn = self.get_connection(StoreKind::Parcels)?;
        let mut stmt = conn.prepare_cached(
            "SELECT parcel_id, geom FROM parcels
             WHERE state_fips = ?1 AND county_fips = ?2 AND geom IS NOT NULL
               AND (geom_area_m2(geom) > ?3 OR geom_area_m2(geom) IS NULL)
             ORDER BY parcel_id
             LIMIT ?4 OFFSET ?5",
        )?;
        let min_area_m2 = min_area_acres * M2_PER_ACRE;
        let limit = limit.map(|l| l.min(i64::MAX as u64) as i64).unwrap_or(-1);
        let rows = stmt.query_map(
            params![state_fips, county_fips, min_area_m2, limit, offset as i64],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut parcels = Vec::new();
        for row in rows {
            let (parcel_id, wkb) = row?;
            let geometry = ParcelGeometry::from_wkb(&wkb).unwrap_or_else(|e| {
                warn!(parcel_id = %parcel_id, error = %e, "Undecodable parcel geometry");
                ParcelGeometry::empty()
            });
            parcels.push(Parcel::new(parcel_id, state_fips, county_fips, geometry));
        }
        debug!(
            state = state_fips,
            county = county_fips,
            offset,
            loaded = parcels.len(),
            "Loaded parcel page"
        );
        Ok(parcels)
    }

    /// Number of parcels `get_county_parcels` would page through.
    pub fn count_county_parcels(
        &self,
        state_fips: &str,
        county_fips: &str,
        min_area_acres: f64,
    ) -> Result<u64> {
        let conn = self.get_connection(StoreKind::Parcels)?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM parcels
             WHERE state_fips = ?1 AND county_fips = ?2 AND geom IS NOT NULL
               AND (geom_area_m2(geom) > ?3 OR geom_area_m2(geom) IS NULL)",
            params![state_fips, county_fips, min_area_acres * M2_PER_ACRE],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    /// Insert or replace parcels; returns rows written.
    pub fn insert_parcels(&self, parcels: &[Parcel]) -> Result<usize> {
        let mut conn = self.get_connection(StoreKind::Parcels)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO parcels
                 (parcel_id, state_fips, county_fips, geom, min_lon, min_lat, max_lon, max_lat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for parcel in parcels {
                let bounds = parcel.geometry.bounds();
                stmt.execute(params![
                    parcel.parcel_id,
                    parcel.state_fips,
                    parcel.county_fips,
                    parcel.geometry.to_wkb(),
                    bounds.map(|b| b.min_x),
                    bounds.map(|b| b.min_y),
                    bounds.map(|b| b.max_x),
                    bounds.map(|b| b.max_y),
                ])?;
            }
        }
        tx.commit()?;
        Ok(parcels.len())
    }

    // ------------------------------------------------------------------
    // Crops
    // ------------------------------------------------------------------

    /// Overlap of a parcel with each agricultural crop code it touches,
    /// largest first. Non-agricultural codes are never returned.
    pub fn get_crop_intersections(&self, parcel: &ParcelGeometry) -> Result<Vec<CropIntersection>> {
        let Some(bounds) = parcel.bounds() else {
            return Ok(Vec::new());
        };
        let parcel_area_m2 = parcel.area_m2();
        if parcel_area_m2 <= 0.0 {
            return Ok(Vec::new());
        }

        let excluded = NON_AGRICULTURAL_CODES
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT crop_code, SUM(geom_intersection_area_m2(?1, geom)) AS overlap
             FROM cdl_polygons
             WHERE max_lon >= ?2 AND min_lon <= ?3 AND max_lat >= ?4 AND min_lat <= ?5
               AND crop_code NOT IN ({excluded})
             GROUP BY crop_code
             HAVING overlap > 0
             ORDER BY overlap DESC, crop_code"
        );
        let conn = self.get_connection(StoreKind::Crops)?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![
                parcel.to_wkb(),
                bounds.min_x,
                bounds.max_x,
                bounds.min_y,
                bounds.max_y
            ],
            |r| Ok((r.get::<_, i32>(0)?, r.get::<_, f64>(1)?)),
        )?;

        let mut intersections = Vec::new();
        for row in rows {
            let (crop_code, overlap) = row?;
            intersections.push(CropIntersection {
                crop_code,
                intersection_area_m2: overlap,
                parcel_area_m2,
                coverage_percent: overlap / parcel_area_m2 * 100.0,
            });
        }
        debug!(codes = intersections.len(), "Crop intersections");
        Ok(intersections)
    }

    /// Insert crop polygons; returns rows written. Empty geometries are
    /// ignored.
    pub fn insert_crop_polygons(&self, polygons: &[(i32, ParcelGeometry)]) -> Result<usize> {
        let mut conn = self.get_connection(StoreKind::Crops)?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cdl_polygons (crop_code, geom, min_lon, min_lat, max_lon, max_lat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (crop_code, geometry) in polygons {
                let Some(b) = geometry.bounds() else {
                    continue;
                };
                stmt.execute(params![
                    crop_code,
                    geometry.to_wkb(),
                    b.min_x,
                    b.min_y,
                    b.max_x,
                    b.max_y
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Forest inventory
    // ------------------------------------------------------------------

    /// Up to [`MAX_NEARBY_PLOTS`] plots within `radius_degrees` of
    /// `(lon, lat)`, nearest first.
    pub fn get_nearby_forest_plots(
        &self,
        lon: f64,
        lat: f64,
        radius_degrees: f64,
    ) -> Result<Vec<ForestPlot>> {
        if !(lon.is_finite() && lat.is_finite() && radius_degrees >= 0.0) {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {PLOT_COLUMNS},
                    (lon - ?1) * (lon - ?1) + (lat - ?2) * (lat - ?2) AS d2
             FROM fia_plots
             WHERE lat IS NOT NULL AND lon IS NOT NULL
               AND lon BETWEEN ?1 - ?3 AND ?1 + ?3
               AND lat BETWEEN ?2 - ?3 AND ?2 + ?3
               AND (lon - ?1) * (lon - ?1) + (lat - ?2) * (lat - ?2) <= ?3 * ?3
             ORDER BY d2, plot_cn
             LIMIT {MAX_NEARBY_PLOTS}"
        );
        let conn = self.get_connection(StoreKind::Forestry)?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let plots = stmt
            .query_map(params![lon, lat, radius_degrees], |r| {
                let d2: f64 = r.get(18)?;
                plot_from_row(r, d2.sqrt())
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(plots = plots.len(), radius_degrees, "Nearby FIA plots");
        Ok(plots)
    }

    /// Live trees with above-ground biomass on the given plots.
    pub fn get_trees_for_plots(&self, plot_ids: &[String]) -> Result<Vec<TreeRecord>> {
        if plot_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_connection(StoreKind::Forestry)?;
        let mut trees = Vec::new();
        for chunk in plot_ids.chunks(TREE_QUERY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {TREE_COLUMNS} FROM fia_trees
                 WHERE plt_cn IN ({placeholders})
                   AND statuscd = {LIVE_TREE_STATUS}
                   AND drybio_ag IS NOT NULL AND drybio_ag > 0
                 ORDER BY plt_cn, tree_cn"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), tree_from_row)?;
            for tree in rows {
                trees.push(tree?);
            }
        }
        debug!(trees = trees.len(), plots = plot_ids.len(), "FIA trees");
        Ok(trees)
    }

    /// Insert or replace plots; returns rows written.
    pub fn insert_forest_plots(&self, plots: &[ForestPlot]) -> Result<usize> {
        let mut conn = self.get_connection(StoreKind::Forestry)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO fia_plots ({PLOT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ))?;
            for plot in plots {
                let b = plot.biomass;
                let treatment = |i: usize| plot.stand.treatment_years.get(i).copied();
                stmt.execute(params![
                    plot.plot_id,
                    plot.lat,
                    plot.lon,
                    plot.inventory_year,
                    b.map(|b| b.drybio_ag),
                    b.map(|b| b.drybio_bg),
                    b.map(|b| b.drybio_bole),
                    b.map(|b| b.drybio_sawlog),
                    b.map(|b| b.drybio_stem),
                    b.map(|b| b.drybio_branch),
                    b.map(|b| b.drybio_foliage),
                    b.map(|b| b.drybio_stump),
                    plot.stand.stand_age,
                    plot.stand.forest_type_code,
                    plot.stand.ownership_group,
                    treatment(0),
                    treatment(1),
                    treatment(2),
                ])?;
            }
        }
        tx.commit()?;
        Ok(plots.len())
    }

    /// Insert or replace trees; returns rows written.
    pub fn insert_trees(&self, trees: &[TreeRecord]) -> Result<usize> {
        let mut conn = self.get_connection(StoreKind::Forestry)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO fia_trees ({TREE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ))?;
            for t in trees {
                stmt.execute(params![
                    t.tree_id,
                    t.plot_id,
                    t.species_code,
                    t.status_code,
                    t.dia,
                    t.ht,
                    t.tpa_unadj,
                    t.drybio_ag,
                    t.drybio_bg,
                    t.drybio_bole,
                    t.drybio_sawlog,
                    t.drybio_stem,
                    t.drybio_branch,
                    t.drybio_foliage,
                    t.drybio_stump,
                ])?;
            }
        }
        tx.commit()?;
        Ok(trees.len())
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Upsert a batch of records in one transaction: either every record
    /// is written or none is. A record whose `(parcel_id,
    /// processing_timestamp)` already exists is updated in place.
    pub fn save_biomass_results(&self, records: &[BiomassRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection(StoreKind::Output)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO parcel_biomass_analysis ({RESULT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
                 ON CONFLICT (parcel_id, processing_timestamp) DO UPDATE SET
                    county_fips = excluded.county_fips,
                    total_acres = excluded.total_acres,
                    centroid_lon = excluded.centroid_lon,
                    centroid_lat = excluded.centroid_lat,
                    forest_acres = excluded.forest_acres,
                    cropland_acres = excluded.cropland_acres,
                    other_acres = excluded.other_acres,
                    forest_percentage = excluded.forest_percentage,
                    cropland_percentage = excluded.cropland_percentage,
                    forest_biomass_tons = excluded.forest_biomass_tons,
                    forest_harvestable_tons = excluded.forest_harvestable_tons,
                    forest_residue_tons = excluded.forest_residue_tons,
                    crop_yield_tons = excluded.crop_yield_tons,
                    crop_residue_tons = excluded.crop_residue_tons,
                    total_biomass_tons = excluded.total_biomass_tons,
                    ndvi = excluded.ndvi,
                    evi = excluded.evi,
                    savi = excluded.savi,
                    ndwi = excluded.ndwi,
                    confidence_score = excluded.confidence_score,
                    data_sources = excluded.data_sources,
                    landcover_analysis = excluded.landcover_analysis,
                    forest_analysis = excluded.forest_analysis,
                    crop_analysis = excluded.crop_analysis"
            ))?;
            for r in records {
                let finite = |v: f64| v.is_finite().then_some(v);
                stmt.execute(params![
                    r.parcel_id,
                    r.county_fips,
                    r.total_acres,
                    finite(r.centroid_lon),
                    finite(r.centroid_lat),
                    r.forest_acres,
                    r.cropland_acres,
                    r.other_acres,
                    r.forest_percentage,
                    r.cropland_percentage,
                    r.forest_biomass_tons,
                    r.forest_harvestable_tons,
                    r.forest_residue_tons,
                    r.crop_yield_tons,
                    r.crop_residue_tons,
                    r.total_biomass_tons,
                    r.indices.ndvi,
                    r.indices.evi,
                    r.indices.savi,
                    r.indices.ndwi,
                    r.confidence_score,
                    serde_json::to_string(&r.data_sources)?,
                    timestamp_key(&r.processing_timestamp),
                    json_text(&r.landcover_analysis)?,
                    json_text(&r.forest_analysis)?,
                    json_text(&r.crop_analysis)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(records = records.len(), "Saved biomass results");
        Ok(records.len())
    }

    /// Every stored record for a county, ordered by parcel and timestamp.
    pub fn get_biomass_results(&self, county_fips: &str) -> Result<Vec<BiomassRecord>> {
        let conn = self.get_connection(StoreKind::Output)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RESULT_COLUMNS} FROM parcel_biomass_analysis
             WHERE county_fips = ?1
             ORDER BY parcel_id, processing_timestamp"
        ))?;
        let records = stmt
            .query_map([county_fips], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Number of stored records for a county.
    pub fn count_biomass_results(&self, county_fips: &str) -> Result<u64> {
        let conn = self.get_connection(StoreKind::Output)?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM parcel_biomass_analysis WHERE county_fips = ?1",
            [county_fips],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Record that `checkpoint.batch_num` has been saved.
    ///
    /// While a county is in progress its batch numbers must strictly
    /// increase; a stale or repeated write is rejected with
    /// [`StoreError::CheckpointRegression`]. A completed county may be
    /// restarted from any batch.
    pub fn create_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.get_connection(StoreKind::Output)?;
        let tx = conn.transaction()?;
        let existing: Option<(u32, String)> = tx
            .query_row(
                "SELECT batch_num, status FROM processing_checkpoints WHERE county_fips = ?1",
                [&checkpoint.county_fips],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((current, status)) = existing {
            let in_progress = CheckpointStatus::parse(&status) == Some(CheckpointStatus::InProgress);
            if in_progress && checkpoint.batch_num <= current {
                return Err(StoreError::CheckpointRegression {
                    county_fips: checkpoint.county_fips.clone(),
                    current,
                    attempted: checkpoint.batch_num,
                });
            }
        }
        tx.execute(
            &format!(
                "INSERT INTO processing_checkpoints ({CHECKPOINT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (county_fips) DO UPDATE SET
                    batch_num = excluded.batch_num,
                    parcel_offset = excluded.parcel_offset,
                    parcels_processed = excluded.parcels_processed,
                    parcels_skipped = excluded.parcels_skipped,
                    errors_count = excluded.errors_count,
                    status = excluded.status,
                    processing_timestamp = excluded.processing_timestamp,
                    checkpoint_timestamp = excluded.checkpoint_timestamp"
            ),
            params![
                checkpoint.county_fips,
                checkpoint.batch_num,
                checkpoint.parcel_offset as i64,
                checkpoint.parcels_processed as i64,
                checkpoint.parcels_skipped as i64,
                checkpoint.errors_count as i64,
                CheckpointStatus::InProgress.as_str(),
                timestamp_key(&checkpoint.processing_timestamp),
                timestamp_key(&checkpoint.checkpoint_timestamp),
            ],
        )?;
        tx.commit()?;
        debug!(
            county = %checkpoint.county_fips,
            batch = checkpoint.batch_num,
            offset = checkpoint.parcel_offset,
            "Checkpoint written"
        );
        Ok(())
    }

    /// The county's checkpoint row in any status.
    pub fn get_checkpoint(&self, state_fips: &str, county_fips: &str) -> Result<Option<Checkpoint>> {
        let conn = self.get_connection(StoreKind::Output)?;
        let checkpoint = conn
            .query_row(
                &format!(
                    "SELECT {CHECKPOINT_COLUMNS} FROM processing_checkpoints WHERE county_fips = ?1"
                ),
                [format!("{state_fips}{county_fips}")],
                checkpoint_from_row,
            )
            .optional()?;
        Ok(checkpoint)
    }

    /// Mark the county completed. Returns false when it has no checkpoint.
    pub fn complete_county_processing(&self, state_fips: &str, county_fips: &str) -> Result<bool> {
        let conn = self.get_connection(StoreKind::Output)?;
        let updated = conn.execute(
            "UPDATE processing_checkpoints SET status = ?2, checkpoint_timestamp = ?3
             WHERE county_fips = ?1",
            params![
                format!("{state_fips}{county_fips}"),
                CheckpointStatus::Completed.as_str(),
                timestamp_key(&Utc::now()),
            ],
        )?;
        if updated > 0 {
            info!(county = %format!("{state_fips}{county_fips}"), "County marked completed");
        }
        Ok(updated > 0)
    }

    /// Remove the county's checkpoint so the next run starts from zero.
    pub fn clear_checkpoint(&self, state_fips: &str, county_fips: &str) -> Result<bool> {
        let conn = self.get_connection(StoreKind::Output)?;
        let deleted = conn.execute(
            "DELETE FROM processing_checkpoints WHERE county_fips = ?1",
            [format!("{state_fips}{county_fips}")],
        )?;
        Ok(deleted > 0)
    }
}
