//! # biomass-runner
//!
//! Batch orchestration for parcel biomass estimation.
//!
//! - [`ParcelProcessor`]: one parcel through every analyzer into a
//!   [`BiomassRecord`](biomass_common::BiomassRecord) or a skip reason
//! - [`WorkerPool`]: fixed worker threads with a per-parcel time budget
//! - [`CountyProcessor`]: batches of parcels with save-then-checkpoint
//!   ordering and resume from the last saved batch
//! - [`BatchCoordinator`]: many counties in sequence with a JSON run-state
//!   file
//!
//! The `biomass` binary wraps these behind a CLI.

pub mod config;
pub mod coordinator;
pub mod county;
mod error;
pub mod parcel;
pub mod pool;
pub mod summary;

pub use config::{AppConfig, ProcessingConfig};
pub use coordinator::{BatchCoordinator, RunState};
pub use county::{CountyProcessor, CountyReport, CountyRunOptions, CountyStatus};
pub use error::RunnerError;
pub use parcel::{ParcelAnalysis, ParcelOutcome, ParcelProcessor};
pub use pool::{TaskResult, WorkerPool};
pub use summary::{CountyFailure, RunSummary, RunTotals, TileActivity};

use biomass_coords::CoordinateTransformer;
use biomass_store::SpatialStore;
use biomass_tiles::TileManager;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Open the stores and tile manager described by `config` and build a
/// coordinator around them.
pub fn open_coordinator(config: &AppConfig, stop: Arc<AtomicBool>) -> Result<BatchCoordinator> {
    let store = Arc::new(SpatialStore::open(&config.stores)?);
    store.initialize_schemas()?;
    let tiles = Arc::new(TileManager::new(
        config.tiles.open_store()?,
        Arc::new(CoordinateTransformer::new()),
        config.tiles.clone(),
    ));
    let processor = CountyProcessor::from_config(config, store, tiles, stop.clone())?;
    Ok(BatchCoordinator::new(processor, stop))
}
