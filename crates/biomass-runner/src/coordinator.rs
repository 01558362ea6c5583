//! Runs a list of counties for one state, one county at a time.
//!
//! Progress is kept in a JSON run-state file so an interrupted state run
//! can be restarted and skip the counties it already finished. Within a
//! county, resuming is handled by the store checkpoint.

use crate::county::{CountyProcessor, CountyRunOptions, CountyStatus};
use crate::summary::{RunSummary, RunTotals};
use crate::{Result, RunnerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Persisted progress of a state run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub state_fips: String,
    pub completed: BTreeSet<String>,
    /// County FIPS to abort reason.
    pub failed: BTreeMap<String, String>,
    pub totals: RunTotals,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(state_fips: impl Into<String>) -> Self {
        Self {
            state_fips: state_fips.into(),
            ..Default::default()
        }
    }

    /// Read a run-state file. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(RunnerError::File {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write through a temporary file so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        let file_error = |source| RunnerError::File {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, json).map_err(file_error)?;
        std::fs::rename(&tmp, path).map_err(file_error)
    }
}

/// Drives a [`CountyProcessor`] over many counties.
#[derive(Debug)]
pub struct BatchCoordinator {
    processor: CountyProcessor,
    run_state_path: Option<PathBuf>,
    stop: Arc<AtomicBool>,
}

impl BatchCoordinator {
    pub fn new(processor: CountyProcessor, stop: Arc<AtomicBool>) -> Self {
        Self {
            processor,
            run_state_path: None,
            stop,
        }
    }

    /// Keep progress in `path` and skip counties it lists as completed.
    pub fn with_run_state(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_state_path = Some(path.into());
        self
    }

    pub fn processor(&self) -> &CountyProcessor {
        &self.processor
    }

    /// Process a single county and summarize it.
    pub fn process_county(
        &self,
        state_fips: &str,
        county_fips: &str,
        options: CountyRunOptions,
    ) -> RunSummary {
        self.process_state(state_fips, &[county_fips.to_string()], options)
            .unwrap_or_else(|e| {
                let mut summary = RunSummary::default();
                summary.add_failure(format!("{state_fips}{county_fips}"), e.to_string());
                summary
            })
    }

    /// Process `counties` in order. A county abort is recorded and the
    /// next county starts; only run-state file errors fail the call.
    pub fn process_state(
        &self,
        state_fips: &str,
        counties: &[String],
        options: CountyRunOptions,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let mut state = self.load_state(state_fips, options.fresh)?;
        let mut summary = RunSummary::default();
        let tiles = self.processor.tiles();
        info!(state = state_fips, counties = counties.len(), "Starting state run");

        for county_fips in counties {
            let full_fips = format!("{state_fips}{county_fips}");
            if self.stop.load(Ordering::SeqCst) {
                info!(state = state_fips, "Stop requested; not starting more counties");
                break;
            }
            if state.completed.contains(&full_fips) {
                info!(county = %full_fips, "Already completed; skipping");
                summary.already_completed.push(full_fips);
                continue;
            }

            match self.processor.process_county(state_fips, county_fips, options) {
                Ok(report) => {
                    if report.status == CountyStatus::Completed {
                        state.completed.insert(full_fips.clone());
                        state.failed.remove(&full_fips);
                    }
                    state.totals.merge(&report.totals);
                    summary.add_county(report);
                }
                Err(e) => {
                    let reason = match e {
                        RunnerError::CountyAborted { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    error!(county = %full_fips, %reason, "County failed");
                    state.failed.insert(full_fips.clone(), reason.clone());
                    summary.add_failure(full_fips, reason);
                }
            }

            summary.tiles.add_cache(tiles.cache_stats());
            tiles.clear_cache();
            self.save_state(&mut state)?;
        }

        summary.tiles.set_downloads(tiles.download_stats());
        summary.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            state = state_fips,
            completed = summary.counties.len(),
            failed = summary.failed_counties.len(),
            tons = summary.totals.total_biomass_tons,
            "State run finished"
        );
        Ok(summary)
    }

    fn load_state(&self, state_fips: &str, fresh: bool) -> Result<RunState> {
        let Some(path) = &self.run_state_path else {
            return Ok(RunState::new(state_fips));
        };
        if fresh {
            return Ok(RunState::new(state_fips));
        }
        Ok(match RunState::load(path)? {
            Some(state) if state.state_fips == state_fips => {
                info!(
                    path = %path.display(),
                    completed = state.completed.len(),
                    "Resuming state run"
                );
                state
            }
            Some(state) => {
                warn!(
                    path = %path.display(),
                    found = %state.state_fips,
                    "Run state belongs to another state; starting over"
                );
                RunState::new(state_fips)
            }
            None => RunState::new(state_fips),
        })
    }

    fn save_state(&self, state: &mut RunState) -> Result<()> {
        if let Some(path) = &self.run_state_path {
            state.updated_at = Some(Utc::now());
            state.save(path)?;
        }
        Ok(())
    }
}
