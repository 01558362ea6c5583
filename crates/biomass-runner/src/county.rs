//! One county, batch by batch: resolve bounds, index tiles, then load,
//! analyze, save and checkpoint until the parcels run out.

use crate::config::{AppConfig, ProcessingConfig};
use crate::parcel::{ParcelOutcome, ParcelProcessor};
use crate::pool::{TaskResult, WorkerPool};
use crate::summary::RunTotals;
use crate::{Result, RunnerError};
use biomass_analysis::{Coefficients, VegetationThresholds};
use biomass_common::{BiomassRecord, Checkpoint, CheckpointStatus, Parcel};
use biomass_metrics::{metric_defs, CountyLabels};
use biomass_store::SpatialStore;
use biomass_tiles::TileManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a county run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountyStatus {
    /// Every parcel was handled; the checkpoint is marked completed.
    Completed,
    /// The stop flag was raised; resumable from the checkpoint.
    Interrupted,
    /// The parcel limit was reached; resumable from the checkpoint.
    LimitReached,
    /// A later page of parcels could not be loaded; resumable.
    LoadFailed,
}

impl CountyStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CountyStatus::Completed => "completed",
            CountyStatus::Interrupted => "interrupted",
            CountyStatus::LimitReached => "limit_reached",
            CountyStatus::LoadFailed => "load_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountyRunOptions {
    /// Stop after this many parcels have been attempted in this run.
    pub parcel_limit: Option<u64>,
    /// Ignore any checkpoint and start from the first parcel.
    pub fresh: bool,
}

/// Outcome of one [`CountyProcessor::process_county`] call.
///
/// `totals` covers the parcels handled by this call only; counts from a
/// resumed checkpoint are not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyReport {
    pub county_fips: String,
    pub status: CountyStatus,
    /// Last batch saved by an earlier run, when resuming.
    pub resumed_from_batch: Option<u32>,
    pub batches: u32,
    pub totals: RunTotals,
    pub processing_timestamp: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Where a county run starts.
struct StartPoint {
    batch_num: u32,
    offset: u64,
    timestamp: DateTime<Utc>,
    /// Counters already recorded in the checkpoint.
    carried: Option<Checkpoint>,
}

type ParcelTask = (Parcel, DateTime<Utc>);

/// Processes counties with a shared worker pool.
#[derive(Debug)]
pub struct CountyProcessor {
    store: Arc<SpatialStore>,
    tiles: Arc<TileManager>,
    config: ProcessingConfig,
    pool: WorkerPool<ParcelTask, ParcelOutcome>,
    stop: Arc<AtomicBool>,
}

impl CountyProcessor {
    pub fn new(
        store: Arc<SpatialStore>,
        tiles: Arc<TileManager>,
        coefficients: Arc<Coefficients>,
        thresholds: VegetationThresholds,
        config: ProcessingConfig,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let processor = Arc::new(ParcelProcessor::new(
            store.clone(),
            tiles.clone(),
            coefficients,
            thresholds,
            config.clone(),
        ));
        let pool = WorkerPool::new("parcel", config.max_workers, move |(parcel, timestamp)| {
            processor.process(&parcel, timestamp)
        })?;
        Ok(Self {
            store,
            tiles,
            config,
            pool,
            stop,
        })
    }

    /// Build from application config, loading coefficient overrides.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<SpatialStore>,
        tiles: Arc<TileManager>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let coefficients = Arc::new(config.load_coefficients()?);
        Self::new(
            store,
            tiles,
            coefficients,
            config.vegetation_thresholds,
            config.processing.clone(),
            stop,
        )
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SpatialStore> {
        &self.store
    }

    pub fn tiles(&self) -> &Arc<TileManager> {
        &self.tiles
    }

    /// Process one county, resuming from an in-progress checkpoint unless
    /// `options.fresh` is set.
    ///
    /// Fails with [`RunnerError::CountyAborted`] when the county's bounds
    /// cannot be resolved or its first page of parcels cannot be loaded.
    pub fn process_county(
        &self,
        state_fips: &str,
        county_fips: &str,
        options: CountyRunOptions,
    ) -> Result<CountyReport> {
        let result = self.run_county(state_fips, county_fips, options);
        match &result {
            Ok(report) if report.status == CountyStatus::Completed => {
                metrics::counter!(metric_defs::COUNTIES_COMPLETED.name, "state" => state_fips.to_string())
                    .increment(1);
            }
            Err(e) => {
                error!(county = %format!("{state_fips}{county_fips}"), error = %e, "County aborted");
                metrics::counter!(metric_defs::COUNTIES_FAILED.name, "state" => state_fips.to_string())
                    .increment(1);
            }
            Ok(_) => {}
        }
        result
    }

    fn run_county(
        &self,
        state_fips: &str,
        county_fips: &str,
        options: CountyRunOptions,
    ) -> Result<CountyReport> {
        let started = Instant::now();
        let full_fips = format!("{state_fips}{county_fips}");
        let abort = |reason: String| RunnerError::aborted(full_fips.clone(), reason);
        let labels = CountyLabels::new(state_fips, county_fips);

        let start = self.start_point(state_fips, county_fips, options.fresh)?;
        let resumed_from_batch = start.carried.as_ref().map(|c| c.batch_num);
        match resumed_from_batch {
            Some(batch) => info!(
                county = %full_fips,
                batch,
                offset = start.offset,
                "Resuming county from checkpoint"
            ),
            None => info!(county = %full_fips, "Starting county"),
        }

        let bounds = match self.store.get_county_bounds(state_fips, county_fips) {
            Ok(Some(bounds)) => bounds,
            Ok(None) => return Err(abort("county has no parcels".into())),
            Err(e) => return Err(abort(format!("cannot resolve county bounds: {e}"))),
        };
        debug!(county = %full_fips, ?bounds, "Bounds resolved");

        match self.tiles.build_county_tile_index(&bounds, self.config.period) {
            Ok(entries) => info!(county = %full_fips, tiles = entries.len(), "Tile index built"),
            Err(e) => warn!(
                county = %full_fips,
                error = %e,
                "Tile index failed; continuing without imagery"
            ),
        }

        let batch_size = self.config.batch_size.max(1);
        let timestamp = start.timestamp;
        let mut batch_num = start.batch_num;
        let mut offset = start.offset;
        let mut totals = RunTotals::default();
        let mut batches = 0u32;
        let mut first_page = true;
        let status = loop {
            if self.stop.load(Ordering::SeqCst) {
                info!(county = %full_fips, batch = batch_num, "Stop requested");
                break CountyStatus::Interrupted;
            }
            let limit = match options.parcel_limit {
                Some(max) => {
                    let left = max.saturating_sub(totals.parcels_attempted);
                    if left == 0 {
                        info!(county = %full_fips, max, "Parcel limit reached");
                        break CountyStatus::LimitReached;
                    }
                    left.min(batch_size)
                }
                None => batch_size,
            };

            let page = match self.store.get_county_parcels(
                state_fips,
                county_fips,
                offset,
                Some(limit),
                self.config.min_parcel_acres,
            ) {
                Ok(page) => page,
                Err(e) if first_page => return Err(abort(format!("cannot load parcels: {e}"))),
                Err(e) => {
                    error!(county = %full_fips, batch = batch_num, offset, error = %e, "Parcel page failed to load");
                    break CountyStatus::LoadFailed;
                }
            };
            first_page = false;
            if page.is_empty() {
                break CountyStatus::Completed;
            }

            let page_len = page.len() as u64;
            info!(
                county = %full_fips,
                batch = batch_num,
                offset,
                parcels = page_len,
                "Processing batch"
            );
            let (batch, saved) = self.process_batch(page, timestamp, &labels);
            totals.merge(&batch);
            batches += 1;
            offset += page_len;

            // Only a saved batch may be checkpointed. A later saved batch
            // moves the offset past a failed one.
            if saved {
                self.write_checkpoint(&full_fips, batch_num, offset, timestamp, &start, &totals, &labels);
            }
            batch_num += 1;

            if page_len < limit {
                break CountyStatus::Completed;
            }
        };

        if status == CountyStatus::Completed {
            if let Err(e) = self.store.complete_county_processing(state_fips, county_fips) {
                warn!(county = %full_fips, error = %e, "Could not mark county completed");
            }
        }

        let report = CountyReport {
            county_fips: full_fips,
            status,
            resumed_from_batch,
            batches,
            totals,
            processing_timestamp: timestamp,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            county = %report.county_fips,
            status = report.status.as_str(),
            processed = report.totals.parcels_processed,
            skipped = report.totals.skipped(),
            errors = report.totals.errors(),
            tons = report.totals.total_biomass_tons,
            elapsed_secs = report.elapsed_secs,
            "County finished"
        );
        Ok(report)
    }

    fn start_point(&self, state_fips: &str, county_fips: &str, fresh: bool) -> Result<StartPoint> {
        let full_fips = format!("{state_fips}{county_fips}");
        let abort = |e: biomass_store::StoreError| {
            RunnerError::aborted(full_fips.clone(), format!("cannot read checkpoint: {e}"))
        };
        if fresh && self.store.clear_checkpoint(state_fips, county_fips).map_err(abort)? {
            info!(county = %full_fips, "Checkpoint cleared");
        }
        let checkpoint = self
            .store
            .get_checkpoint(state_fips, county_fips)
            .map_err(abort)?
            .filter(|c| c.status == CheckpointStatus::InProgress);
        Ok(match checkpoint {
            Some(c) => StartPoint {
                batch_num: c.batch_num + 1,
                offset: c.parcel_offset,
                timestamp: c.processing_timestamp,
                carried: Some(c),
            },
            None => StartPoint {
                batch_num: 1,
                offset: 0,
                timestamp: Utc::now(),
                carried: None,
            },
        })
    }

    /// Analyze one page of parcels and save what they produced. Returns the
    /// batch tallies and whether the save succeeded; a failed save turns the
    /// batch's records into errors.
    fn process_batch(
        &self,
        page: Vec<Parcel>,
        timestamp: DateTime<Utc>,
        labels: &CountyLabels,
    ) -> (RunTotals, bool) {
        let mut batch = RunTotals {
            parcels_attempted: page.len() as u64,
            ..Default::default()
        };
        let parcel_ids: Vec<String> = page.iter().map(|p| p.parcel_id.clone()).collect();
        let tasks = page.into_iter().map(|p| (p, timestamp)).collect();
        let results = self.pool.run(tasks, self.config.parcel_timeout());

        let mut records: Vec<BiomassRecord> = Vec::new();
        for (parcel_id, result) in parcel_ids.iter().zip(results) {
            match result {
                TaskResult::Completed(ParcelOutcome::Processed(record)) => records.push(*record),
                TaskResult::Completed(ParcelOutcome::Skipped(reason)) => {
                    debug!(parcel_id = %parcel_id, %reason, "Parcel skipped");
                    batch.record_skip(reason);
                    metrics::counter!(
                        metric_defs::PARCELS_SKIPPED.name,
                        &labels.with(&[("reason", reason.as_str().to_string())])
                    )
                    .increment(1);
                }
                TaskResult::Completed(ParcelOutcome::Failed(_)) => {
                    batch.parcels_failed += 1;
                    metrics::counter!(metric_defs::PARCELS_FAILED.name, &labels.to_labels())
                        .increment(1);
                }
                TaskResult::Panicked(message) => {
                    error!(parcel_id = %parcel_id, %message, "Parcel analysis panicked");
                    batch.parcels_failed += 1;
                    metrics::counter!(metric_defs::PARCELS_FAILED.name, &labels.to_labels())
                        .increment(1);
                }
                TaskResult::TimedOut => {
                    warn!(parcel_id = %parcel_id, "Parcel timed out");
                    batch.parcels_timed_out += 1;
                    metrics::counter!(metric_defs::PARCELS_TIMED_OUT.name, &labels.to_labels())
                        .increment(1);
                }
            }
        }

        let saved = match self.store.save_biomass_results(&records) {
            Ok(saved) => {
                for record in &records {
                    batch.record(record, self.config.confidence_threshold);
                }
                metrics::counter!(metric_defs::PARCELS_PROCESSED.name, &labels.to_labels())
                    .increment(records.len() as u64);
                metrics::counter!(metric_defs::RECORDS_SAVED.name, &labels.to_labels())
                    .increment(saved as u64);
                metrics::counter!(metric_defs::BATCHES_SAVED.name, &labels.to_labels()).increment(1);
                true
            }
            Err(e) => {
                error!(
                    county = %labels.county,
                    records = records.len(),
                    error = %e,
                    "Saving batch failed; its parcels count as errors"
                );
                batch.parcels_failed += records.len() as u64;
                metrics::counter!(metric_defs::PARCELS_FAILED.name, &labels.to_labels())
                    .increment(records.len() as u64);
                metrics::counter!(metric_defs::BATCHES_FAILED.name, &labels.to_labels()).increment(1);
                false
            }
        };
        (batch, saved)
    }

    /// Record the batch as saved. Counters include those carried from the
    /// checkpoint this run resumed from.
    #[allow(clippy::too_many_arguments)]
    fn write_checkpoint(
        &self,
        county_fips: &str,
        batch_num: u32,
        offset: u64,
        timestamp: DateTime<Utc>,
        start: &StartPoint,
        totals: &RunTotals,
        labels: &CountyLabels,
    ) {
        let carried = start.carried.as_ref();
        let checkpoint = Checkpoint {
            county_fips: county_fips.to_string(),
            batch_num,
            parcel_offset: offset,
            parcels_processed: carried.map_or(0, |c| c.parcels_processed) + totals.parcels_processed,
            parcels_skipped: carried.map_or(0, |c| c.parcels_skipped) + totals.skipped(),
            errors_count: carried.map_or(0, |c| c.errors_count) + totals.errors(),
            status: CheckpointStatus::InProgress,
            processing_timestamp: timestamp,
            checkpoint_timestamp: Utc::now(),
        };
        match self.store.create_checkpoint(&checkpoint) {
            Ok(()) => {
                metrics::counter!(metric_defs::CHECKPOINT_WRITES.name, &labels.to_labels())
                    .increment(1);
            }
            Err(e) => warn!(county = %county_fips, batch = batch_num, error = %e, "Checkpoint write failed"),
        }
    }
}
