use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::SeedError;
use crate::domain::models::{
    Dataset, SeedOutcome, SeedState, STORE_HOST, STORE_NAME, STORE_PASSWORD, STORE_USER,
};

/// Store coordinates carried by the module environment contract.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreLocation {
    /// Directory holding the store's data
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl StoreLocation {
    /// Read the location from an environment map, naming the first missing key.
    pub fn from_env(env: &BTreeMap<String, String>) -> Result<Self, String> {
        let get = |key: &str| {
            env.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| format!("missing {key}"))
        };
        Ok(Self {
            host: get(STORE_HOST)?,
            name: get(STORE_NAME)?,
            user: get(STORE_USER)?,
            password: get(STORE_PASSWORD)?,
        })
    }

    /// Read the location from this process's environment.
    pub fn from_process_env() -> Result<Self, String> {
        Self::from_env(&std::env::vars().collect())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.host).join(format!("{}.db", self.name))
    }

    pub fn url(&self) -> String {
        format!("sqlite:{}", self.database_path().display())
    }
}

impl fmt::Debug for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLocation")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Port for the relational store the seeder populates.
#[async_trait]
pub trait SeedStore: Send + Sync {
    /// Current seeding bookkeeping, `None` when never seeded.
    async fn seed_state(&self) -> Result<Option<SeedState>, SeedError>;

    /// Load `dataset` exactly once per version, atomically.
    async fn seed(&self, dataset: &Dataset) -> Result<SeedOutcome, SeedError>;

    /// Rows currently loaded.
    async fn row_count(&self) -> Result<u64, SeedError>;
}

/// Opens a [`SeedStore`] at a location.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, location: &StoreLocation) -> Result<Box<dyn SeedStore>, SeedError>;
}
