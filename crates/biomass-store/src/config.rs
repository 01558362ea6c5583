//! Store locations and pool sizing.

use crate::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The four logical databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Parcels,
    Crops,
    Forestry,
    Output,
}

impl StoreKind {
    pub const ALL: [StoreKind; 4] = [
        StoreKind::Parcels,
        StoreKind::Crops,
        StoreKind::Forestry,
        StoreKind::Output,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Parcels => "parcels",
            StoreKind::Crops => "crops",
            StoreKind::Forestry => "forestry",
            StoreKind::Output => "output",
        }
    }

    /// Default `(min, max)` pooled connections. The forest inventory store
    /// serves the most queries and has the highest latency variance.
    pub const fn default_pool_size(&self) -> (usize, usize) {
        match self {
            StoreKind::Forestry => (2, 20),
            StoreKind::Output => (1, 8),
            StoreKind::Parcels | StoreKind::Crops => (1, 5),
        }
    }

    pub const fn default_max_attempts(&self) -> u32 {
        match self {
            StoreKind::Forestry => 5,
            _ => 3,
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one store. Unset sizes fall back to the store's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite file; defaults to `data/{store}.db`.
    pub path: Option<PathBuf>,
    pub min_connections: Option<usize>,
    pub max_connections: Option<usize>,
    pub max_attempts: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
}

/// Resolved pool parameters for one store.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub path: PathBuf,
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl StoreSettings {
    /// Settings pointing at `path` with default sizing.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Fill unset fields from `kind`'s defaults.
    pub fn resolve(&self, kind: StoreKind) -> PoolSettings {
        let (min, max) = kind.default_pool_size();
        let max_connections = self.max_connections.unwrap_or(max).max(1);
        PoolSettings {
            path: self
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("data/{}.db", kind.as_str()))),
            min_connections: self.min_connections.unwrap_or(min).min(max_connections),
            max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs.unwrap_or(30)),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms.unwrap_or(5_000)),
            retry: RetryPolicy::new(
                self.max_attempts
                    .unwrap_or_else(|| kind.default_max_attempts()),
            ),
        }
    }
}

/// Locations of all four stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub parcels: StoreSettings,
    pub crops: StoreSettings,
    pub forestry: StoreSettings,
    pub output: StoreSettings,
}

impl StoreConfig {
    /// All four stores as `{store}.db` inside `dir`.
    pub fn in_directory(dir: &Path) -> Self {
        let at = |kind: StoreKind| StoreSettings::at(dir.join(format!("{}.db", kind.as_str())));
        Self {
            parcels: at(StoreKind::Parcels),
            crops: at(StoreKind::Crops),
            forestry: at(StoreKind::Forestry),
            output: at(StoreKind::Output),
        }
    }

    pub fn settings(&self, kind: StoreKind) -> &StoreSettings {
        match kind {
            StoreKind::Parcels => &self.parcels,
            StoreKind::Crops => &self.crops,
            StoreKind::Forestry => &self.forestry,
            StoreKind::Output => &self.output,
        }
    }
}
