use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::StateError;
use crate::domain::models::ServiceState;

/// Persisted view of an instance started by `up`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub service: String,
    pub pid: Option<u32>,
    /// Identity of `pid` when it was started; see [`crate::domain::models::ServiceHandle`]
    pub identity: Option<String>,
    pub state: ServiceState,
    pub started_at: DateTime<Utc>,
}

/// Repository port for the running-instance ledger
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Insert or update an instance by id
    async fn upsert(&self, record: &InstanceRecord) -> Result<(), StateError>;

    /// All recorded instances, oldest first
    async fn list(&self) -> Result<Vec<InstanceRecord>, StateError>;

    /// Remove one instance
    async fn remove(&self, id: Uuid) -> Result<(), StateError>;

    /// Remove every instance, returning how many were removed
    async fn clear(&self) -> Result<u64, StateError>;
}
