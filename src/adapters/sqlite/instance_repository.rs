//! SQLite implementation of the InstanceRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_uuid};
use crate::domain::errors::StateError;
use crate::domain::models::ServiceState;
use crate::domain::ports::{InstanceRecord, InstanceRepository};

pub struct SqliteInstanceRepository {
    pool: SqlitePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceRepository for SqliteInstanceRepository {
    async fn upsert(&self, record: &InstanceRecord) -> Result<(), StateError> {
        sqlx::query(
            r#"INSERT INTO service_instances (id, service, pid, identity, state, started_at) VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET pid = excluded.pid, identity = excluded.identity, state = excluded.state"#,
        )
        .bind(record.id.to_string())
        .bind(&record.service)
        .bind(record.pid.map(i64::from))
        .bind(&record.identity)
        .bind(record.state.as_str())
        .bind(record.started_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>, StateError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(
            "SELECT id, service, pid, identity, state, started_at FROM service_instances ORDER BY started_at, service",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn remove(&self, id: Uuid) -> Result<(), StateError> {
        sqlx::query("DELETE FROM service_instances WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM service_instances").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    service: String,
    pid: Option<i64>,
    identity: Option<String>,
    state: String,
    started_at: String,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = StateError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let state = ServiceState::from_str(&row.state)
            .ok_or_else(|| StateError::Serialization(format!("Invalid state: {}", row.state)))?;

        let pid = row
            .pid
            .map(u32::try_from)
            .transpose()
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        Ok(InstanceRecord {
            id: parse_uuid(&row.id)?,
            service: row.service,
            pid,
            identity: row.identity,
            state,
            started_at: parse_datetime(&row.started_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Utc;

    async fn setup_repo() -> SqliteInstanceRepository {
        SqliteInstanceRepository::new(create_migrated_test_pool().await.unwrap())
    }

    fn record(service: &str, pid: Option<u32>) -> InstanceRecord {
        InstanceRecord {
            id: Uuid::new_v4(),
            service: service.to_string(),
            pid,
            identity: pid.map(|p| format!("boot:{p}")),
            state: ServiceState::Starting,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_updates_state() {
        let repo = setup_repo().await;
        let mut rec = record("database", Some(4242));
        repo.upsert(&rec).await.unwrap();

        rec.state = ServiceState::Running;
        repo.upsert(&rec).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ServiceState::Running);
        assert_eq!(all[0].pid, Some(4242));
        assert_eq!(all[0].identity.as_deref(), Some("boot:4242"));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let repo = setup_repo().await;
        let a = record("a", None);
        let b = record("b", Some(1));
        repo.upsert(&a).await.unwrap();
        repo.upsert(&b).await.unwrap();

        repo.remove(a.id).await.unwrap();
        assert_eq!(repo.list().await.unwrap().len(), 1);

        assert_eq!(repo.clear().await.unwrap(), 1);
        assert!(repo.list().await.unwrap().is_empty());
    }
}
