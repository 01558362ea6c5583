//! Metrics for the parcel biomass pipeline.
//!
//! Every metric is declared once as a const [`Metric`] in [`metric_defs`] with
//! its kind, description, unit and label keys, so emitters and exporters agree
//! on names. The `metrics` facade is a no-op until a recorder is installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use biomass_metrics::{describe_metrics, metric_defs, CountyLabels};
//!
//! describe_metrics();
//!
//! let labels = CountyLabels::new("19", "055");
//! metrics::counter!(metric_defs::PARCELS_PROCESSED.name, &labels.to_labels()).increment(1);
//! ```
//!
//! # Metric Type
//!
//! ```rust
//! use biomass_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const MY_COUNTER: Metric = Metric::counter("my.counter")
//!     .with_description("A counter metric")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["county"]);
//!
//! assert_eq!(MY_COUNTER.kind, MetricKind::Counter);
//! metrics::counter!(MY_COUNTER.name).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use biomass_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const SAVED: Metric = Metric::counter("biomass.batch.saved")
///     .with_description("Batches saved")
///     .with_unit(Unit::Count)
///     .with_labels(&["state", "county"]);
///
/// assert_eq!(SAVED.name, "biomass.batch.saved");
/// assert_eq!(SAVED.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "biomass.parcel.processed").
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }

    /// The unit's display name, empty when unset.
    pub fn unit_str(&self) -> &'static str {
        self.unit.map_or("", |unit| unit.as_str())
    }
}

/// All metric definitions for the pipeline.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Standard Label Keys
    // ========================================================================

    /// Labels present on all county-scoped metrics.
    pub const COUNTY_LABELS: &[&str] = &["state", "county"];

    // ========================================================================
    // Parcel Metrics
    // ========================================================================

    /// Parcels that produced a biomass record.
    ///
    /// Labels: state, county
    pub const PARCELS_PROCESSED: Metric = Metric::counter("biomass.parcel.processed")
        .with_description("Parcels that produced a biomass record")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Parcels skipped with a reason code.
    ///
    /// Labels: state, county, reason (`invalid_geometry|too_small|no_biomass_detected`)
    pub const PARCELS_SKIPPED: Metric = Metric::counter("biomass.parcel.skipped")
        .with_description("Parcels skipped with a reason code")
        .with_unit(Unit::Count)
        .with_labels(&["state", "county", "reason"]);

    /// Parcels whose analysis failed.
    ///
    /// Labels: state, county
    pub const PARCELS_FAILED: Metric = Metric::counter("biomass.parcel.failed")
        .with_description("Parcels whose analysis returned an error")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Parcels abandoned after exceeding the per-parcel time budget.
    ///
    /// Labels: state, county
    pub const PARCELS_TIMED_OUT: Metric = Metric::counter("biomass.parcel.timed_out")
        .with_description("Parcels abandoned after exceeding the time budget")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Wall time spent analysing one parcel.
    ///
    /// Labels: state, county
    pub const PARCEL_PROCESSING_TIME: Metric = Metric::histogram("biomass.parcel.processing_time")
        .with_description("Wall time spent analysing one parcel")
        .with_unit(Unit::Seconds)
        .with_labels(COUNTY_LABELS);

    // ========================================================================
    // Batch and Checkpoint Metrics
    // ========================================================================

    /// Batches whose records were saved.
    ///
    /// Labels: state, county
    pub const BATCHES_SAVED: Metric = Metric::counter("biomass.batch.saved")
        .with_description("Batches whose records were saved")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Batches that failed as a whole; their parcels count as errors.
    ///
    /// Labels: state, county
    pub const BATCHES_FAILED: Metric = Metric::counter("biomass.batch.failed")
        .with_description("Batches that failed as a whole")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Biomass records written to the output store.
    ///
    /// Labels: state, county
    pub const RECORDS_SAVED: Metric = Metric::counter("biomass.records.saved")
        .with_description("Biomass records upserted into the output store")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Checkpoint rows written.
    ///
    /// Labels: state, county
    pub const CHECKPOINT_WRITES: Metric = Metric::counter("biomass.checkpoint.writes")
        .with_description("Checkpoint rows written")
        .with_unit(Unit::Count)
        .with_labels(COUNTY_LABELS);

    /// Counties that ran to completion.
    ///
    /// Labels: state
    pub const COUNTIES_COMPLETED: Metric = Metric::counter("biomass.county.completed")
        .with_description("Counties processed to completion")
        .with_unit(Unit::Count)
        .with_labels(&["state"]);

    /// Counties aborted during setup.
    ///
    /// Labels: state
    pub const COUNTIES_FAILED: Metric = Metric::counter("biomass.county.failed")
        .with_description("Counties aborted during setup")
        .with_unit(Unit::Count)
        .with_labels(&["state"]);

    // ========================================================================
    // Tile Metrics
    // ========================================================================

    /// Decoded tile served from the LRU cache.
    pub const TILE_CACHE_HITS: Metric = Metric::counter("biomass.tile.cache_hits")
        .with_description("Decoded tiles served from the LRU cache")
        .with_unit(Unit::Count);

    /// Tile lookup that missed the LRU cache.
    pub const TILE_CACHE_MISSES: Metric = Metric::counter("biomass.tile.cache_misses")
        .with_description("Tile lookups that missed the LRU cache")
        .with_unit(Unit::Count);

    /// Decoded tile evicted to make room.
    pub const TILE_CACHE_EVICTIONS: Metric = Metric::counter("biomass.tile.cache_evictions")
        .with_description("Decoded tiles evicted from the LRU cache")
        .with_unit(Unit::Count);

    /// Full tiles downloaded and decoded.
    pub const TILE_FULL_DOWNLOADS: Metric = Metric::counter("biomass.tile.full_downloads")
        .with_description("Full tiles downloaded and decoded")
        .with_unit(Unit::Count);

    /// Parcel windows served with range requests.
    pub const TILE_WINDOW_READS: Metric = Metric::counter("biomass.tile.window_reads")
        .with_description("Parcel windows read with range requests")
        .with_unit(Unit::Count);

    /// Bytes fetched from blob storage.
    pub const TILE_BYTES_DOWNLOADED: Metric = Metric::counter("biomass.tile.bytes_downloaded")
        .with_description("Bytes fetched from blob storage")
        .with_unit(Unit::Bytes);

    /// Tile fetches that failed.
    ///
    /// Labels: not_found (`true` for missing blobs)
    pub const TILE_DOWNLOAD_FAILURES: Metric = Metric::counter("biomass.tile.download_failures")
        .with_description("Tile fetches that failed")
        .with_unit(Unit::Count)
        .with_labels(&["not_found"]);

    // ========================================================================
    // Store Metrics
    // ========================================================================

    /// Connection attempts retried after a transient failure.
    ///
    /// Labels: store (`parcels|crops|forestry|output`)
    pub const DB_CONNECTION_RETRIES: Metric = Metric::counter("biomass.db.connection_retries")
        .with_description("Connection attempts retried after a transient failure")
        .with_unit(Unit::Count)
        .with_labels(&["store"]);

    /// Connections currently checked out of a pool.
    ///
    /// Labels: store
    pub const DB_CONNECTIONS_IN_USE: Metric = Metric::gauge("biomass.db.connections_in_use")
        .with_description("Connections currently checked out of a pool")
        .with_unit(Unit::Count)
        .with_labels(&["store"]);

    // ========================================================================
    // All Metrics
    // ========================================================================

    /// Every metric, for bulk description.
    pub const ALL: &[&Metric] = &[
        &PARCELS_PROCESSED,
        &PARCELS_SKIPPED,
        &PARCELS_FAILED,
        &PARCELS_TIMED_OUT,
        &PARCEL_PROCESSING_TIME,
        &BATCHES_SAVED,
        &BATCHES_FAILED,
        &RECORDS_SAVED,
        &CHECKPOINT_WRITES,
        &COUNTIES_COMPLETED,
        &COUNTIES_FAILED,
        &TILE_CACHE_HITS,
        &TILE_CACHE_MISSES,
        &TILE_CACHE_EVICTIONS,
        &TILE_FULL_DOWNLOADS,
        &TILE_WINDOW_READS,
        &TILE_BYTES_DOWNLOADED,
        &TILE_DOWNLOAD_FAILURES,
        &DB_CONNECTION_RETRIES,
        &DB_CONNECTIONS_IN_USE,
    ];
}

/// Labels identifying the county a metric belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountyLabels {
    /// Two-digit state FIPS code.
    pub state: String,
    /// Three-digit county FIPS code.
    pub county: String,
}

impl CountyLabels {
    pub fn new(state: impl Into<String>, county: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            county: county.into(),
        }
    }

    /// Labels as `(key, value)` pairs for the `metrics` macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("state", self.state.clone()), ("county", self.county.clone())]
    }

    /// Labels with additional key-value pairs.
    ///
    /// ```rust
    /// use biomass_metrics::CountyLabels;
    ///
    /// let labels = CountyLabels::new("19", "055");
    /// let extended = labels.with(&[("reason", "too_small".to_string())]);
    /// assert!(extended.iter().any(|(k, v)| *k == "reason" && v == "too_small"));
    /// ```
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus exporter listening on `addr` and describe all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_county_labels() {
        let labels = CountyLabels::new("19", "055");
        let label_vec = labels.to_labels();
        assert_eq!(label_vec.len(), 2);
        assert!(label_vec.contains(&("state", "19".to_string())));
        assert!(label_vec.contains(&("county", "055".to_string())));
    }

    #[test]
    fn test_with_extra_labels() {
        let labels = CountyLabels::new("19", "055");
        let extended = labels.with(&[("reason", "too_small".to_string())]);
        assert_eq!(extended.len(), 3);
        assert_eq!(extended[2], ("reason", "too_small".to_string()));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::PARCELS_PROCESSED.name, "biomass.parcel.processed");
        assert_eq!(metric_defs::PARCELS_PROCESSED.labels, metric_defs::COUNTY_LABELS);
        assert_eq!(metric_defs::PARCEL_PROCESSING_TIME.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::PARCEL_PROCESSING_TIME.unit_str(), "seconds");
        assert_eq!(metric_defs::DB_CONNECTIONS_IN_USE.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::TILE_BYTES_DOWNLOADED.unit, Some(Unit::Bytes));
    }

    #[test]
    fn test_all_metrics_unique() {
        assert_eq!(metric_defs::ALL.len(), 20);
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert!(metric_defs::ALL.iter().all(|m| !m.description.is_empty()));
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::counter("minimal");
        assert_eq!(MINIMAL.kind, MetricKind::Counter);
        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
        assert_eq!(MINIMAL.labels, &[] as &[&str]);
    }
}
