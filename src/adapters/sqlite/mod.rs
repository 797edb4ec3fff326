//! SQLite adapters: the orchestrator's state database and the relational store.

pub mod build_cache;
pub mod connection;
pub mod instance_repository;
pub mod migrations;
pub mod seed_store;

pub use build_cache::SqliteBuildCache;
pub use connection::{create_pool, create_test_pool, database_url, verify_connection, ConnectionError, PoolConfig};
pub use instance_repository::SqliteInstanceRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use seed_store::{SqliteSeedStore, SqliteStoreConnector};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use crate::domain::errors::StateError;

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> Result<Uuid, StateError> {
    Uuid::parse_str(s).map_err(|e| StateError::Serialization(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StateError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| StateError::Serialization(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open the state database at `path` and bring its schema up to date.
pub async fn initialize_database(path: &Path, max_connections: u32) -> Result<SqlitePool, DatabaseError> {
    let config = PoolConfig { max_connections, ..PoolConfig::default() };
    let pool = create_pool(&database_url(path), Some(config)).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
