//! Built-in computation modules.
//!
//! Each module reads the store location from the module environment
//! contract (`STORE_HOST`, `STORE_NAME`, `STORE_USER`, `STORE_PASSWORD`),
//! runs one read-only query against the seeded store and renders a table.

pub mod avg_measure;
pub mod top_producers;

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use crate::adapters::sqlite::{create_pool, verify_connection, PoolConfig};
use crate::domain::ports::StoreLocation;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("store environment incomplete: {0}")]
    Environment(String),

    #[error("store at {path} not reachable: {reason}")]
    Unreachable { path: String, reason: String },

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("store holds no records")]
    Empty,
}

impl ModuleError {
    /// Process exit code for a failed module run.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Environment(_) => 2,
            Self::Unreachable { .. } => 3,
            Self::Query(_) => 4,
            Self::Empty => 5,
        }
    }
}

/// Bounded retry for the initial store connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up after this long
    pub max_elapsed: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl ConnectPolicy {
    /// Try exactly once.
    pub const fn once() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            max_elapsed: Duration::ZERO,
        }
    }
}

/// Read the store location from this process's environment.
pub fn location_from_env() -> Result<StoreLocation, ModuleError> {
    StoreLocation::from_process_env().map_err(ModuleError::Environment)
}

async fn open_once(location: &StoreLocation, create: bool) -> Result<SqlitePool, ModuleError> {
    let unreachable = |reason: String| ModuleError::Unreachable {
        path: location.database_path().display().to_string(),
        reason,
    };

    if !std::path::Path::new(&location.host).is_dir() {
        return Err(unreachable("host directory does not exist".to_string()));
    }

    let config = PoolConfig {
        max_connections: 1,
        acquire_timeout: Duration::from_secs(5),
        create_if_missing: create,
        ..PoolConfig::default()
    };
    let pool = create_pool(&location.url(), Some(config))
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    verify_connection(&pool).await.map_err(|e| unreachable(e.to_string()))?;
    Ok(pool)
}

/// Connect to an existing store, retrying with exponential backoff.
pub async fn connect_store(location: &StoreLocation, policy: ConnectPolicy) -> Result<SqlitePool, ModuleError> {
    info!(path = %location.database_path().display(), "waiting for store");

    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_max_elapsed_time(Some(policy.max_elapsed))
        .build();

    let pool = backoff::future::retry(backoff, || async {
        open_once(location, false).await.map_err(|e| match e {
            ModuleError::Unreachable { .. } => {
                debug!(error = %e, "store not ready yet");
                backoff::Error::transient(e)
            }
            other => backoff::Error::permanent(other),
        })
    })
    .await?;

    info!("store is ready");
    Ok(pool)
}

/// Health probe: the store database opens and answers `SELECT 1`.
///
/// The database file is created inside the store's volume when absent, so
/// the probe passes before seeding.
pub async fn ping(location: &StoreLocation) -> Result<(), ModuleError> {
    let pool = open_once(location, true).await?;
    pool.close().await;
    Ok(())
}

/// Round half away from zero to `places` decimals.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
