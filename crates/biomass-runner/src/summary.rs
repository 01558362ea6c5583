//! Parcel and biomass tallies, and the end-of-run summary.

use crate::county::{CountyReport, CountyStatus};
use biomass_common::{BiomassRecord, SkipReason};
use biomass_tiles::{CacheStats, DownloadStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::ExitCode;

/// Parcel counts and biomass sums over any span of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub parcels_attempted: u64,
    pub parcels_processed: u64,
    pub parcels_skipped: BTreeMap<SkipReason, u64>,
    pub parcels_failed: u64,
    pub parcels_timed_out: u64,
    pub forest_biomass_tons: f64,
    pub forest_harvestable_tons: f64,
    pub crop_yield_tons: f64,
    pub crop_residue_tons: f64,
    pub total_biomass_tons: f64,
    pub confidence_sum: f64,
    /// Processed parcels below the configured confidence threshold.
    pub low_confidence: u64,
}

impl RunTotals {
    pub fn record(&mut self, record: &BiomassRecord, confidence_threshold: f64) {
        self.parcels_processed += 1;
        self.forest_biomass_tons += record.forest_biomass_tons;
        self.forest_harvestable_tons += record.forest_harvestable_tons;
        self.crop_yield_tons += record.crop_yield_tons;
        self.crop_residue_tons += record.crop_residue_tons;
        self.total_biomass_tons += record.total_biomass_tons;
        self.confidence_sum += record.confidence_score;
        if record.confidence_score < confidence_threshold {
            self.low_confidence += 1;
        }
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.parcels_skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.parcels_skipped.values().sum()
    }

    /// Hard errors: failed and timed-out parcels. Skips are not errors.
    pub fn errors(&self) -> u64 {
        self.parcels_failed + self.parcels_timed_out
    }

    pub fn average_confidence(&self) -> Option<f64> {
        (self.parcels_processed > 0).then(|| self.confidence_sum / self.parcels_processed as f64)
    }

    pub fn merge(&mut self, other: &RunTotals) {
        self.parcels_attempted += other.parcels_attempted;
        self.parcels_processed += other.parcels_processed;
        for (reason, count) in &other.parcels_skipped {
            *self.parcels_skipped.entry(*reason).or_default() += count;
        }
        self.parcels_failed += other.parcels_failed;
        self.parcels_timed_out += other.parcels_timed_out;
        self.forest_biomass_tons += other.forest_biomass_tons;
        self.forest_harvestable_tons += other.forest_harvestable_tons;
        self.crop_yield_tons += other.crop_yield_tons;
        self.crop_residue_tons += other.crop_residue_tons;
        self.total_biomass_tons += other.total_biomass_tons;
        self.confidence_sum += other.confidence_sum;
        self.low_confidence += other.low_confidence;
    }
}

/// Tile download and cache counters at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileActivity {
    pub full_downloads: u64,
    pub window_reads: u64,
    pub bytes_downloaded: u64,
    pub missing_tiles: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
}

impl TileActivity {
    /// Overwrite the download counters, which are cumulative.
    pub fn set_downloads(&mut self, downloads: DownloadStats) {
        self.full_downloads = downloads.full_downloads;
        self.window_reads = downloads.window_reads;
        self.bytes_downloaded = downloads.bytes_downloaded;
        self.missing_tiles = downloads.missing_tiles;
        self.failures = downloads.failures;
    }

    /// Add cache counters; call before each cache clear, which resets them.
    pub fn add_cache(&mut self, cache: CacheStats) {
        self.cache_hits += cache.hits;
        self.cache_misses += cache.misses;
        self.cache_evictions += cache.evictions;
    }
}

/// A county that could not be set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountyFailure {
    pub county_fips: String,
    pub reason: String,
}

/// Everything a run did, for the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub counties: Vec<CountyReport>,
    pub failed_counties: Vec<CountyFailure>,
    /// Counties skipped because an earlier run completed them.
    pub already_completed: Vec<String>,
    pub totals: RunTotals,
    pub tiles: TileActivity,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn add_county(&mut self, report: CountyReport) {
        self.totals.merge(&report.totals);
        self.counties.push(report);
    }

    pub fn add_failure(&mut self, county_fips: impl Into<String>, reason: impl Into<String>) {
        self.failed_counties.push(CountyFailure {
            county_fips: county_fips.into(),
            reason: reason.into(),
        });
    }

    pub fn interrupted(&self) -> bool {
        self.counties
            .iter()
            .any(|c| matches!(c.status, CountyStatus::Interrupted | CountyStatus::LoadFailed))
    }

    /// True when nothing ran and at least one county aborted.
    pub fn aborted(&self) -> bool {
        self.counties.is_empty() && !self.failed_counties.is_empty()
    }

    /// 0 on full success, 2 on partial success, 1 when aborted.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub fn exit_status(&self) -> u8 {
        if self.aborted() {
            1
        } else if self.totals.errors() > 0 || !self.failed_counties.is_empty() || self.interrupted()
        {
            2
        } else {
            0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(f, "=== Biomass Run Summary ===")?;
        for county in &self.counties {
            writeln!(
                f,
                "  {} {:<13} {} processed, {} skipped, {} errors",
                county.county_fips,
                county.status.as_str(),
                county.totals.parcels_processed,
                county.totals.skipped(),
                county.totals.errors(),
            )?;
        }
        for failure in &self.failed_counties {
            writeln!(f, "  {} aborted: {}", failure.county_fips, failure.reason)?;
        }
        if !self.already_completed.is_empty() {
            writeln!(f, "  already completed: {}", self.already_completed.join(", "))?;
        }
        writeln!(f)?;
        writeln!(f, "Parcels attempted:   {}", t.parcels_attempted)?;
        writeln!(f, "  processed:         {}", t.parcels_processed)?;
        for (reason, count) in &t.parcels_skipped {
            writeln!(f, "  skipped ({reason}): {count}")?;
        }
        writeln!(f, "  failed:            {}", t.parcels_failed)?;
        writeln!(f, "  timed out:         {}", t.parcels_timed_out)?;
        writeln!(f)?;
        writeln!(f, "Forest biomass:      {:.1} tons", t.forest_biomass_tons)?;
        writeln!(f, "  harvestable:       {:.1} tons", t.forest_harvestable_tons)?;
        writeln!(f, "Crop yield:          {:.1} tons", t.crop_yield_tons)?;
        writeln!(f, "Crop residue:        {:.1} tons", t.crop_residue_tons)?;
        writeln!(f, "Total biomass:       {:.1} tons", t.total_biomass_tons)?;
        match t.average_confidence() {
            Some(avg) => writeln!(
                f,
                "Average confidence:  {avg:.3} ({} below threshold)",
                t.low_confidence
            )?,
            None => writeln!(f, "Average confidence:  n/a")?,
        }
        writeln!(f)?;
        writeln!(
            f,
            "Tiles: {} full downloads, {} window reads, {:.1} MiB, {} missing, {} failed",
            self.tiles.full_downloads,
            self.tiles.window_reads,
            self.tiles.bytes_downloaded as f64 / (1024.0 * 1024.0),
            self.tiles.missing_tiles,
            self.tiles.failures,
        )?;
        write!(f, "Elapsed: {:.1}s", self.elapsed_secs)
    }
}
