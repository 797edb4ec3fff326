//! Common test utilities for integration tests
//!
//! Provides a scripted in-memory service runtime, dataset and manifest
//! fixtures, and helpers shared across the integration test files.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use keel::adapters::sqlite::{create_migrated_test_pool, SqliteInstanceRepository, SqliteStoreConnector};
use keel::domain::errors::RuntimeError;
use keel::domain::models::{
    HealthCheck, ImageRef, SeedSpec, ServiceHandle, ServiceRole, ServiceSpec, VolumeBinding, STORE_HOST,
    STORE_NAME, STORE_PASSWORD, STORE_USER,
};
use keel::domain::ports::{LaunchSpec, ServiceRuntime, StoreLocation};
use keel::services::{DataSeeder, LifecycleController, SeedPlan, ServicePlan};

/// Header every fixture dataset uses.
pub const DATASET_HEADER: &str = "name,category,measure_a,measure_b,producer_name,producer_location";

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Write a CSV dataset with the given data rows under `dir`.
pub fn write_dataset(dir: &Path, file: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(file);
    let mut body = String::from(DATASET_HEADER);
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');
    std::fs::write(&path, body).expect("Failed to write dataset");
    path
}

/// Two lagers from X, one stout from Y.
pub fn lager_rows() -> Vec<&'static str> {
    vec!["A,lager,5.0,20,X,loc1", "B,stout,8.0,40,Y,loc2", "C,lager,4.5,18,X,loc1"]
}

/// How a scripted service answers health probes.
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    AlwaysHealthy,
    AlwaysFailing,
    /// Fails this many probes, then passes
    HealthyAfter(u32),
}

/// Something the runtime was asked to do, in call order.
#[derive(Debug, Clone)]
pub struct RuntimeCall {
    pub service: String,
    pub kind: CallKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Start,
    Probe,
    Stop,
    Release,
}

/// In-memory `ServiceRuntime` whose services behave as scripted.
///
/// Services without a scripted exit code run until stopped.
#[derive(Default)]
pub struct FakeRuntime {
    probes: HashMap<String, Probe>,
    exit_codes: HashMap<String, i32>,
    failing_starts: Vec<String>,
    calls: Mutex<Vec<RuntimeCall>>,
    launches: Mutex<Vec<LaunchSpec>>,
    probe_counts: Mutex<HashMap<String, u32>>,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(mut self, service: &str, probe: Probe) -> Self {
        self.probes.insert(service.to_string(), probe);
        self
    }

    pub fn exits(mut self, service: &str, code: i32) -> Self {
        self.exit_codes.insert(service.to_string(), code);
        self
    }

    pub fn fails_to_start(mut self, service: &str) -> Self {
        self.failing_starts.push(service.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }

    /// Services in the order they were started.
    pub fn started(&self) -> Vec<String> {
        self.calls_of(CallKind::Start)
            .into_iter()
            .map(|call| call.service)
            .collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.calls_of(CallKind::Stop)
            .into_iter()
            .map(|call| call.service)
            .collect()
    }

    pub fn probe_count(&self, service: &str) -> u32 {
        self.probe_counts.lock().unwrap().get(service).copied().unwrap_or(0)
    }

    pub fn first_call(&self, service: &str, kind: CallKind) -> Option<DateTime<Utc>> {
        self.calls()
            .into_iter()
            .find(|call| call.service == service && call.kind == kind)
            .map(|call| call.at)
    }

    fn calls_of(&self, kind: CallKind) -> Vec<RuntimeCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.kind == kind)
            .collect()
    }

    fn record(&self, service: &str, kind: CallKind) {
        self.calls.lock().unwrap().push(RuntimeCall {
            service: service.to_string(),
            kind,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl ServiceRuntime for FakeRuntime {
    async fn start(&self, launch: &LaunchSpec) -> Result<ServiceHandle, RuntimeError> {
        self.record(&launch.service, CallKind::Start);
        self.launches.lock().unwrap().push(launch.clone());

        if self.failing_starts.contains(&launch.service) {
            return Err(RuntimeError::Spawn {
                service: launch.service.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }

        let handle = ServiceHandle {
            instance_id: Uuid::new_v4(),
            service: launch.service.clone(),
            pid: None,
            identity: None,
        };
        self.running
            .lock()
            .unwrap()
            .insert(handle.instance_id, CancellationToken::new());
        Ok(handle)
    }

    async fn probe(&self, handle: &ServiceHandle, _check: &HealthCheck) -> Result<bool, RuntimeError> {
        self.record(&handle.service, CallKind::Probe);
        let attempt = {
            let mut counts = self.probe_counts.lock().unwrap();
            let count = counts.entry(handle.service.clone()).or_insert(0);
            *count += 1;
            *count
        };

        Ok(match self.probes.get(&handle.service) {
            None | Some(Probe::AlwaysHealthy) => true,
            Some(Probe::AlwaysFailing) => false,
            Some(Probe::HealthyAfter(failures)) => attempt > *failures,
        })
    }

    async fn wait(&self, handle: &ServiceHandle) -> Result<i32, RuntimeError> {
        if let Some(code) = self.exit_codes.get(&handle.service) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            return Ok(*code);
        }

        let token = self
            .running
            .lock()
            .unwrap()
            .get(&handle.instance_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownInstance(handle.service.clone()))?;
        token.cancelled().await;
        Ok(0)
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<(), RuntimeError> {
        self.record(&handle.service, CallKind::Stop);
        if let Some(token) = self.running.lock().unwrap().remove(&handle.instance_id) {
            token.cancel();
        }
        Ok(())
    }

    async fn release(&self, service: &str, _pid: u32, _identity: Option<&str>) -> Result<(), RuntimeError> {
        self.record(service, CallKind::Release);
        Ok(())
    }
}

/// A service spec with no command, dependencies or probe.
pub fn service(name: &str, role: ServiceRole) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        image: ImageRef::new("base", "1"),
        role,
        command: None,
        depends_on: vec![],
        environment: BTreeMap::new(),
        healthcheck: None,
        volumes: vec![],
    }
}

pub fn fast_check(retries: u32) -> HealthCheck {
    HealthCheck {
        test: vec!["true".to_string()],
        interval: Duration::from_millis(5),
        timeout: Duration::from_millis(50),
        retries,
    }
}

/// A store bound to the `pgdata` volume with a fast probe.
pub fn store(name: &str, retries: u32) -> ServiceSpec {
    let mut spec = service(name, ServiceRole::Store);
    spec.healthcheck = Some(fast_check(retries));
    spec.volumes.push(VolumeBinding {
        name: "pgdata".to_string(),
        target: "KEEL_VOLUME_PGDATA".to_string(),
    });
    spec
}

/// A module depending on `store` that honours the store env contract.
pub fn module(name: &str, store: &str) -> ServiceSpec {
    let mut spec = service(name, ServiceRole::Module);
    spec.command = Some(vec!["keel".to_string(), "module".to_string(), "avg-measure".to_string()]);
    spec.depends_on.push(store.to_string());
    spec.environment = BTreeMap::from([
        (STORE_HOST.to_string(), store.to_string()),
        (STORE_NAME.to_string(), "beers".to_string()),
        (STORE_USER.to_string(), "app".to_string()),
        (STORE_PASSWORD.to_string(), "secret".to_string()),
    ]);
    spec
}

pub fn plan(spec: ServiceSpec) -> ServicePlan {
    let launch = LaunchSpec {
        service: spec.name.clone(),
        command: spec.command.clone(),
        environment: spec.environment.clone(),
        ..LaunchSpec::default()
    };
    ServicePlan {
        spec,
        launch,
    }
}

pub fn store_location(host: &Path) -> StoreLocation {
    StoreLocation {
        host: host.display().to_string(),
        name: "beers".to_string(),
        user: "app".to_string(),
        password: "secret".to_string(),
    }
}

pub fn seed_plan(store: &str, dataset: PathBuf, host: &Path) -> SeedPlan {
    SeedPlan {
        store: store.to_string(),
        spec: SeedSpec {
            store: store.to_string(),
            dataset,
            version: Some("1".to_string()),
        },
        location: store_location(host),
    }
}

/// Controller over `runtime` with an in-memory ledger and a real SQLite seeder.
pub async fn controller(
    runtime: Arc<FakeRuntime>,
    plans: Vec<ServicePlan>,
    seed: Option<SeedPlan>,
) -> LifecycleController {
    let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
    LifecycleController::new(
        runtime,
        Arc::new(SqliteInstanceRepository::new(pool)),
        Arc::new(DataSeeder::new(Arc::new(SqliteStoreConnector))),
        plans,
        seed,
    )
    .expect("Failed to build controller")
}
