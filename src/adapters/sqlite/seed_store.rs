//! SQLite implementation of the SeedStore.
//!
//! The relational store is one SQLite file inside the store service's
//! volume. `STORE_USER`/`STORE_PASSWORD` are carried for contract
//! compatibility; SQLite itself does not authenticate.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;

use super::connection::{create_pool, PoolConfig};
use super::parse_datetime;
use crate::domain::errors::SeedError;
use crate::domain::models::{Dataset, SeedOutcome, SeedState};
use crate::domain::ports::{SeedStore, StoreConnector, StoreLocation};

const SCHEMA: [&str; 2] = [
    r"CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        measure_a REAL NOT NULL,
        measure_b INTEGER NOT NULL,
        producer_name TEXT NOT NULL,
        producer_location TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS seed_state (
        dataset_version TEXT PRIMARY KEY,
        row_count INTEGER NOT NULL,
        seeded_at TEXT NOT NULL
    )",
];

const INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_records_category ON records(category)",
    "CREATE INDEX IF NOT EXISTS idx_records_producer_name ON records(producer_name)",
];

pub struct SqliteSeedStore {
    pool: SqlitePool,
}

impl SqliteSeedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the store database, creating the file inside an existing host directory.
    pub async fn open(location: &StoreLocation) -> Result<Self, SeedError> {
        if !std::path::Path::new(&location.host).is_dir() {
            return Err(SeedError::Store(format!(
                "store host directory {} does not exist",
                location.host
            )));
        }

        let config = PoolConfig {
            max_connections: 2,
            acquire_timeout: Duration::from_secs(10),
            ..PoolConfig::default()
        };
        let pool = create_pool(&location.url(), Some(config))
            .await
            .map_err(|e| SeedError::Store(e.to_string()))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Row counts per category, ordered by category.
    pub async fn records_by_category(&self) -> Result<Vec<(String, u64)>, SeedError> {
        if !self.table_exists("records").await? {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT category, COUNT(*) FROM records GROUP BY category ORDER BY category")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(c, n)| (c, n.unsigned_abs())).collect())
    }

    /// Names of the indexes on the `records` table.
    pub async fn record_indexes(&self) -> Result<Vec<String>, SeedError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'records' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, SeedError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Body of the seed transaction. The caller owns commit and rollback.
    async fn seed_locked(conn: &mut SqliteConnection, dataset: &Dataset) -> Result<SeedOutcome, SeedError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *conn).await?;
        }

        let existing: Option<(String, i64)> =
            sqlx::query_as("SELECT dataset_version, row_count FROM seed_state LIMIT 1")
                .fetch_optional(&mut *conn)
                .await?;

        match existing {
            Some((version, rows)) if version == dataset.version => {
                return Ok(SeedOutcome::AlreadySeeded {
                    version,
                    rows: rows.unsigned_abs(),
                });
            }
            Some((previous, _)) => {
                tracing::info!(
                    previous_version = %previous,
                    new_version = %dataset.version,
                    "replacing previously seeded dataset"
                );
                sqlx::query("DELETE FROM records").execute(&mut *conn).await?;
                sqlx::query("DELETE FROM seed_state").execute(&mut *conn).await?;
            }
            None => {}
        }

        for row in &dataset.rows {
            let record = &row.record;
            let malformed = |reason: String| SeedError::MalformedRecord {
                line: row.line,
                record: record.name.clone(),
                reason,
            };

            record.validate().map_err(malformed)?;

            sqlx::query(
                r#"INSERT INTO records (name, category, measure_a, measure_b, producer_name, producer_location)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&record.name)
            .bind(&record.category)
            .bind(record.measure_a_rounded())
            .bind(record.measure_b)
            .bind(&record.producer_name)
            .bind(&record.producer_location)
            .execute(&mut *conn)
            .await
            .map_err(|e| malformed(e.to_string()))?;
        }

        for statement in INDEXES {
            sqlx::query(statement).execute(&mut *conn).await?;
        }

        let rows = dataset.rows.len() as u64;
        sqlx::query("INSERT INTO seed_state (dataset_version, row_count, seeded_at) VALUES (?, ?, ?)")
            .bind(&dataset.version)
            .bind(i64::try_from(rows).map_err(|e| SeedError::Store(e.to_string()))?)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await?;

        Ok(SeedOutcome::Seeded {
            version: dataset.version.clone(),
            rows,
        })
    }
}

#[async_trait]
impl SeedStore for SqliteSeedStore {
    async fn seed_state(&self) -> Result<Option<SeedState>, SeedError> {
        if !self.table_exists("seed_state").await? {
            return Ok(None);
        }

        let row: Option<(String, i64, String)> =
            sqlx::query_as("SELECT dataset_version, row_count, seeded_at FROM seed_state LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(dataset_version, row_count, seeded_at)| {
            Ok(SeedState {
                dataset_version,
                row_count: row_count.unsigned_abs(),
                seeded_at: parse_datetime(&seeded_at).map_err(|e| SeedError::Store(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn seed(&self, dataset: &Dataset) -> Result<SeedOutcome, SeedError> {
        // IMMEDIATE takes the write lock up front so the version check and
        // the load are atomic against a concurrent seeder.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        match Self::seed_locked(&mut *tx, dataset).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "failed to roll back seed transaction");
                }
                Err(err)
            }
        }
    }

    async fn row_count(&self) -> Result<u64, SeedError> {
        if !self.table_exists("records").await? {
            return Ok(0);
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.unsigned_abs())
    }
}

/// Opens [`SqliteSeedStore`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteStoreConnector;

#[async_trait]
impl StoreConnector for SqliteStoreConnector {
    async fn connect(&self, location: &StoreLocation) -> Result<Box<dyn SeedStore>, SeedError> {
        Ok(Box::new(SqliteSeedStore::open(location).await?))
    }
}
