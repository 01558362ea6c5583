//! SpatialStore behaviour against throwaway SQLite files.

use approx::assert_relative_eq;
use biomass_common::{
    BiomassRecord, Bounds, Checkpoint, CheckpointStatus, DataSource, ForestPlot, IndexValues,
    Parcel, ParcelGeometry, PlotBiomass, StandAttributes, TreeRecord,
};
use biomass_store::{SpatialStore, StoreConfig, StoreError, StoreKind, MAX_NEARBY_PLOTS};
use chrono::{TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn open() -> (TempDir, SpatialStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SpatialStore::open(&StoreConfig::in_directory(dir.path())).unwrap();
    store.initialize_schemas().unwrap();
    (dir, store)
}

fn square(lon: f64, lat: f64, size: f64) -> ParcelGeometry {
    ParcelGeometry::from_bounds(&Bounds::new(lon, lat, lon + size, lat + size))
}

fn record(parcel_id: &str, confidence: f64) -> BiomassRecord {
    let mut r = BiomassRecord {
        parcel_id: parcel_id.into(),
        county_fips: "19055".into(),
        total_acres: 10.0,
        centroid_lon: -91.5,
        centroid_lat: 42.5,
        forest_acres: 4.0,
        cropland_acres: 5.0,
        other_acres: 0.0,
        forest_percentage: 40.0,
        cropland_percentage: 50.0,
        forest_biomass_tons: 120.0,
        forest_harvestable_tons: 80.0,
        forest_residue_tons: 40.0,
        crop_yield_tons: 21.0,
        crop_residue_tons: 10.0,
        total_biomass_tons: 0.0,
        indices: IndexValues {
            ndvi: Some(0.71),
            evi: None,
            savi: Some(0.5),
            ndwi: Some(-0.4),
        },
        confidence_score: confidence,
        data_sources: vec![DataSource::WorldCover, DataSource::Cdl],
        processing_timestamp: Utc.with_ymd_and_hms(2024, 8, 29, 12, 0, 0).unwrap(),
        landcover_analysis: Some(serde_json::json!({ "forest_percent": 40.0 })),
        forest_analysis: None,
        crop_analysis: None,
    };
    r.normalize();
    r
}

#[test]
fn test_save_is_idempotent_per_timestamp() {
    let (_dir, store) = open();
    let records = vec![record("a", 0.6), record("b", 0.7)];
    store.save_biomass_results(&records).unwrap();
    store.save_biomass_results(&records).unwrap();
    assert_eq!(store.count_biomass_results("19055").unwrap(), 2);

    let mut updated = record("a", 0.9);
    updated.forest_biomass_tons = 200.0;
    updated.normalize();
    store.save_biomass_results(&[updated]).unwrap();
    let saved = store.get_biomass_results("19055").unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].parcel_id, "a");
    assert_relative_eq!(saved[0].forest_biomass_tons, 200.0);
    assert_relative_eq!(saved[0].confidence_score, 0.9);
    assert_eq!(saved[0].indices.evi, None);
    assert_eq!(saved[0].data_sources, vec![DataSource::WorldCover, DataSource::Cdl]);
    assert_eq!(saved[1], records[1]);

    // A new run bucket adds rows instead of replacing.
    let mut later = record("a", 0.6);
    later.processing_timestamp = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
    store.save_biomass_results(&[later]).unwrap();
    assert_eq!(store.count_biomass_results("19055").unwrap(), 3);
}

#[test]
fn test_save_is_all_or_nothing() {
    let (_dir, store) = open();
    let mut bad = record("c", 0.5);
    bad.confidence_score = 1.5;
    let result = store.save_biomass_results(&[record("a", 0.5), bad]);
    assert!(result.is_err());
    assert_eq!(store.count_biomass_results("19055").unwrap(), 0);
}

#[test]
fn test_pagination_covers_county_exactly() {
    let (_dir, store) = open();
    let mut rng = ChaCha8Rng::seed_from_u64(17);

    let mut parcels = Vec::new();
    let mut eligible = BTreeSet::new();
    for i in 0..237 {
        let id = format!("P{:05}{:03}", rng.gen_range(0..100_000u32), i);
        let lon = -93.0 + (i % 20) as f64 * 0.002;
        let lat = 42.0 + (i / 20) as f64 * 0.002;
        // Every seventh parcel is a sliver well under 0.1 acres.
        let size = if i % 7 == 0 { 0.0001 } else { 0.001 };
        if i % 7 != 0 {
            eligible.insert(id.clone());
        }
        parcels.push(Parcel::new(id, "19", "055", square(lon, lat, size)));
    }
    // Another county's parcels never leak in.
    parcels.push(Parcel::new("P00000000", "19", "153", square(-92.0, 41.0, 0.001)));
    parcels.shuffle(&mut rng);
    store.insert_parcels(&parcels).unwrap();

    let total = store.count_county_parcels("19", "055", 0.1).unwrap();
    assert_eq!(total, eligible.len() as u64);

    for _ in 0..20 {
        let limit = rng.gen_range(1..60u64);
        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = store
                .get_county_parcels("19", "055", offset, Some(limit), 0.1)
                .unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() as u64 <= limit);
            offset += page.len() as u64;
            seen.extend(page.into_iter().map(|p| p.parcel_id));
        }
        let unique: BTreeSet<_> = seen.iter().cloned().collect();
        assert_eq!(unique.len(), seen.len(), "duplicate rows at limit {limit}");
        assert_eq!(unique, eligible, "gap at limit {limit}");
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    let everything = store.get_county_parcels("19", "055", 0, None, 0.0).unwrap();
    assert_eq!(everything.len(), 237);
    let first = &everything[0];
    assert_eq!(first.full_county_fips(), "19055");
    assert!(first.area_acres > 0.0);
}

#[test]
fn test_county_bounds() {
    let (_dir, store) = open();
    assert!(store.get_county_bounds("19", "055").unwrap().is_none());
    store
        .insert_parcels(&[
            Parcel::new("a", "19", "055", square(-93.0, 42.0, 0.01)),
            Parcel::new("b", "19", "055", square(-92.5, 42.3, 0.01)),
        ])
        .unwrap();
    let bounds = store.get_county_bounds("19", "055").unwrap().unwrap();
    assert_relative_eq!(bounds.min_x, -93.0);
    assert_relative_eq!(bounds.min_y, 42.0);
    assert_relative_eq!(bounds.max_x, -92.49, epsilon = 1e-9);
    assert_relative_eq!(bounds.max_y, 42.31, epsilon = 1e-9);
}

#[test]
fn test_crop_intersections_group_and_exclude() {
    let (_dir, store) = open();
    store
        .insert_crop_polygons(&[
            // West half corn in two pieces.
            (1, ParcelGeometry::from_bounds(&Bounds::new(-93.0, 42.0, -92.995, 42.005))),
            (1, ParcelGeometry::from_bounds(&Bounds::new(-93.0, 42.005, -92.995, 42.01))),
            // East quarter soybeans.
            (5, ParcelGeometry::from_bounds(&Bounds::new(-92.9925, 42.0, -92.99, 42.01))),
            // Developed land is never agricultural.
            (121, ParcelGeometry::from_bounds(&Bounds::new(-92.995, 42.0, -92.9925, 42.01))),
            // Far away.
            (24, ParcelGeometry::from_bounds(&Bounds::new(-80.0, 35.0, -79.9, 35.1))),
        ])
        .unwrap();

    let parcel = square(-93.0, 42.0, 0.01);
    let crops = store.get_crop_intersections(&parcel).unwrap();
    let codes: Vec<_> = crops.iter().map(|c| c.crop_code).collect();
    assert_eq!(codes, vec![1, 5]);
    assert_relative_eq!(crops[0].coverage_percent, 50.0, max_relative = 1e-3);
    assert_relative_eq!(crops[1].coverage_percent, 25.0, max_relative = 1e-3);
    assert_relative_eq!(crops[0].parcel_area_m2, parcel.area_m2());

    assert!(store
        .get_crop_intersections(&ParcelGeometry::empty())
        .unwrap()
        .is_empty());
}

fn plot(id: &str, lon: f64, lat: f64, biomass: bool) -> ForestPlot {
    ForestPlot {
        plot_id: id.into(),
        lat,
        lon,
        inventory_year: Some(2019),
        distance_degrees: 0.0,
        biomass: biomass.then_some(PlotBiomass {
            drybio_ag: 40.0,
            drybio_bg: 8.0,
            drybio_bole: 25.0,
            drybio_sawlog: 15.0,
            drybio_stem: 28.0,
            drybio_branch: 8.0,
            drybio_foliage: 2.0,
            drybio_stump: 1.0,
        }),
        stand: StandAttributes {
            stand_age: Some(45.0),
            forest_type_code: Some(503),
            ownership_group: Some(40),
            treatment_years: vec![2016],
        },
    }
}

#[test]
fn test_nearby_plots_nearest_first() {
    let (_dir, store) = open();
    let mut plots = vec![
        plot("far", -92.92, 42.0, true),
        plot("near", -92.99, 42.0, false),
        plot("mid", -93.0, 42.05, true),
        plot("outside", -92.7, 42.0, true),
    ];
    for i in 0..60 {
        plots.push(plot(&format!("ring{i:02}"), -93.0 + 0.09, 42.0 + i as f64 * 1e-6, false));
    }
    store.insert_forest_plots(&plots).unwrap();

    let found = store.get_nearby_forest_plots(-93.0, 42.0, 0.1).unwrap();
    assert_eq!(found.len(), MAX_NEARBY_PLOTS);
    assert_eq!(found[0].plot_id, "near");
    assert_relative_eq!(found[0].distance_degrees, 0.01, max_relative = 1e-9);
    assert!(found[0].biomass.is_none());
    assert_eq!(found[1].plot_id, "mid");
    assert_eq!(found[1].biomass.unwrap().drybio_bole, 25.0);
    assert_eq!(found[1].stand.treatment_years, vec![2016]);
    assert_eq!(found[1].stand.forest_type_code, Some(503));
    assert!(found
        .windows(2)
        .all(|w| w[0].distance_degrees <= w[1].distance_degrees));
    assert!(found.iter().all(|p| p.plot_id != "outside"));

    let small = store.get_nearby_forest_plots(-93.0, 42.0, 0.02).unwrap();
    assert_eq!(small.len(), 1);
}

#[test]
fn test_trees_are_live_only() {
    let (_dir, store) = open();
    let tree = |id: &str, plot: &str, status: i32, ag: f64| TreeRecord {
        tree_id: id.into(),
        plot_id: plot.into(),
        species_code: Some(802),
        status_code: status,
        dia: Some(14.2),
        ht: Some(70.0),
        tpa_unadj: Some(6.018046),
        drybio_ag: ag,
        drybio_bg: 150.0,
        drybio_bole: 500.0,
        drybio_sawlog: 400.0,
        drybio_stem: 550.0,
        drybio_branch: 120.0,
        drybio_foliage: 30.0,
        drybio_stump: 20.0,
    };
    store
        .insert_trees(&[
            tree("t1", "p1", 1, 800.0),
            tree("t2", "p1", 2, 800.0),
            tree("t3", "p2", 1, 600.0),
            tree("t4", "p2", 1, 0.0),
            tree("t5", "p3", 1, 700.0),
        ])
        .unwrap();

    let trees = store
        .get_trees_for_plots(&["p1".to_string(), "p2".to_string()])
        .unwrap();
    let ids: Vec<_> = trees.iter().map(|t| t.tree_id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t3"]);
    assert_eq!(trees[0].tpa_unadj, Some(6.018046));
    assert!(store.get_trees_for_plots(&[]).unwrap().is_empty());
}

fn checkpoint(batch: u32, offset: u64) -> Checkpoint {
    Checkpoint {
        county_fips: "19055".into(),
        batch_num: batch,
        parcel_offset: offset,
        parcels_processed: offset,
        parcels_skipped: 0,
        errors_count: 0,
        status: CheckpointStatus::InProgress,
        processing_timestamp: Utc.with_ymd_and_hms(2024, 8, 29, 12, 0, 0).unwrap(),
        checkpoint_timestamp: Utc.with_ymd_and_hms(2024, 8, 29, 12, 5, 0).unwrap(),
    }
}

#[test]
fn test_checkpoints_increase_and_complete() {
    let (_dir, store) = open();
    assert!(store.get_checkpoint("19", "055").unwrap().is_none());

    store.create_checkpoint(&checkpoint(1, 100)).unwrap();
    store.create_checkpoint(&checkpoint(2, 200)).unwrap();
    let current = store.get_checkpoint("19", "055").unwrap().unwrap();
    assert_eq!(current, checkpoint(2, 200));

    match store.create_checkpoint(&checkpoint(2, 200)) {
        Err(StoreError::CheckpointRegression {
            current, attempted, ..
        }) => assert_eq!((current, attempted), (2, 2)),
        other => panic!("expected regression, got {other:?}"),
    }
    assert!(store.create_checkpoint(&checkpoint(1, 100)).is_err());
    assert_eq!(
        store.get_checkpoint("19", "055").unwrap().unwrap().batch_num,
        2
    );

    assert!(store.complete_county_processing("19", "055").unwrap());
    let done = store.get_checkpoint("19", "055").unwrap().unwrap();
    assert_eq!(done.status, CheckpointStatus::Completed);

    // A completed county may be processed again from the start.
    store.create_checkpoint(&checkpoint(1, 100)).unwrap();
    assert_eq!(
        store.get_checkpoint("19", "055").unwrap().unwrap().status,
        CheckpointStatus::InProgress
    );

    assert!(store.clear_checkpoint("19", "055").unwrap());
    assert!(store.get_checkpoint("19", "055").unwrap().is_none());
    assert!(!store.complete_county_processing("19", "055").unwrap());
}

#[test]
fn test_database_stats_and_pool_sizes() {
    let (_dir, store) = open();
    store
        .insert_parcels(&[Parcel::new("a", "19", "055", square(-93.0, 42.0, 0.01))])
        .unwrap();
    let stats = store.database_stats().unwrap();
    assert_eq!(stats.parcels, 1);
    assert_eq!(stats.biomass_records, 0);

    let forestry = store.pool(StoreKind::Forestry).settings();
    assert_eq!(forestry.max_connections, 20);
    assert_eq!(store.pool(StoreKind::Forestry).counts().0, 2);
}
