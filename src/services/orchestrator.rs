//! The `up` / `down` / `build` / `status` operations.
//!
//! [`Orchestrator`] wires the build graph engine, the lifecycle controller,
//! the seeder and the volume manager to one set of adapters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::build_graph::{BuildGraphEngine, BuildReport};
use super::lifecycle::{LifecycleController, RunReport, SeedPlan, ServicePlan};
use super::module_runner::ModuleRunner;
use super::seeder::DataSeeder;
use crate::domain::errors::OrchestratorError;
use crate::domain::models::{
    Manifest, ServiceRole, ServiceSpec, Volume, STORE_HOST, STORE_NAME, STORE_PASSWORD, STORE_USER,
};
use crate::domain::ports::{
    BuildCache, ImageBuilder, InstanceRecord, InstanceRepository, LaunchSpec, ServiceRuntime,
    StoreConnector, StoreLocation, TagRecord,
};
use crate::infrastructure::logging::redact_env;
use crate::infrastructure::VolumeManager;

const DEFAULT_STORE_CREDENTIAL: &str = "keel";

/// Result of `up`.
#[derive(Debug)]
pub struct UpReport {
    pub build: BuildReport,
    pub run: RunReport,
    /// Instances from an earlier run that were stopped first
    pub released: Vec<String>,
}

impl UpReport {
    pub fn exit_code(&self) -> i32 {
        self.run.exit_code()
    }
}

/// Result of `down`.
#[derive(Debug, Default, Serialize)]
pub struct DownReport {
    pub stopped: Vec<String>,
    pub purged: Vec<String>,
}

/// Result of `status`.
#[derive(Debug, Default, Serialize)]
pub struct StatusReport {
    pub instances: Vec<InstanceRecord>,
    pub tags: Vec<TagRecord>,
    pub volumes: Vec<Volume>,
}

/// Pipeline orchestrator over a set of adapters.
pub struct Orchestrator {
    builder: Arc<dyn ImageBuilder>,
    cache: Arc<dyn BuildCache>,
    runtime: Arc<dyn ServiceRuntime>,
    ledger: Arc<dyn InstanceRepository>,
    connector: Arc<dyn StoreConnector>,
    volumes: VolumeManager,
    logs_dir: Option<PathBuf>,
    max_parallel: usize,
}

impl Orchestrator {
    pub fn new(
        builder: Arc<dyn ImageBuilder>,
        cache: Arc<dyn BuildCache>,
        runtime: Arc<dyn ServiceRuntime>,
        ledger: Arc<dyn InstanceRepository>,
        connector: Arc<dyn StoreConnector>,
        volumes: VolumeManager,
    ) -> Self {
        Self {
            builder,
            cache,
            runtime,
            ledger,
            connector,
            volumes,
            logs_dir: None,
            max_parallel: 4,
        }
    }

    /// Redirect each non-module service's output to `<dir>/<service>.log`.
    #[must_use]
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    fn engine(&self) -> BuildGraphEngine {
        BuildGraphEngine::new(self.builder.clone(), self.cache.clone(), self.max_parallel)
    }

    /// Build every declared image. `force` ignores the fingerprint cache.
    pub async fn build(&self, manifest: &Manifest, force: bool) -> Result<BuildReport, OrchestratorError> {
        self.engine().build(manifest, force).await
    }

    /// Build, start, seed and run the pipeline.
    ///
    /// Build failures abort before any service starts. If the run fails or
    /// is interrupted (Ctrl-C), everything started is torn down; volumes are
    /// always kept.
    pub async fn up(&self, manifest: &Manifest) -> Result<UpReport, OrchestratorError> {
        let released = self.release_recorded().await?;

        let build = self.build(manifest, false).await?;
        if !build.is_success() {
            return Err(OrchestratorError::Build(build.errors()));
        }

        let mut bound = BTreeMap::new();
        for name in manifest.volume_names() {
            let volume = self.volumes.ensure(&name).await?;
            bound.insert(name, volume.path);
        }

        let plans = self.plan_services(manifest, &build, &bound);
        let seed = self.plan_seed(manifest, &plans);

        let seeder = Arc::new(DataSeeder::new(self.connector.clone()));
        let mut controller =
            LifecycleController::new(self.runtime.clone(), self.ledger.clone(), seeder, plans, seed)?;

        let interrupt = controller.cancellation();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping services");
                interrupt.cancel();
            }
        });

        let run = controller.run().await;
        watcher.abort();
        if run.is_success() {
            info!("pipeline is up");
        } else {
            warn!(failures = run.failures.len(), "pipeline failed, tearing down");
            controller.teardown().await;
        }

        Ok(UpReport { build, run, released })
    }

    /// Stop every recorded instance. With `purge`, also delete volumes:
    /// the manifest's when one is given, otherwise every volume on disk.
    pub async fn down(&self, manifest: Option<&Manifest>, purge: bool) -> Result<DownReport, OrchestratorError> {
        let stopped = self.release_recorded().await?;

        let mut purged = Vec::new();
        if purge {
            let names: Vec<String> = match manifest {
                Some(manifest) => manifest.volume_names().into_iter().collect(),
                None => self.volumes.list().await?.into_iter().map(|v| v.name).collect(),
            };
            for name in names {
                if self.volumes.purge(&name).await? {
                    purged.push(name);
                }
            }
        }

        info!(stopped = stopped.len(), purged = purged.len(), "pipeline is down");
        Ok(DownReport { stopped, purged })
    }

    pub async fn status(&self) -> Result<StatusReport, OrchestratorError> {
        Ok(StatusReport {
            instances: self.ledger.list().await?,
            tags: self.cache.tags().await?,
            volumes: self.volumes.list().await?,
        })
    }

    /// Stop processes recorded by earlier invocations and clear the ledger.
    async fn release_recorded(&self) -> Result<Vec<String>, OrchestratorError> {
        let records = self.ledger.list().await?;
        let mut released = Vec::with_capacity(records.len());

        for record in records {
            if let Some(pid) = record.pid {
                if let Err(e) = self.runtime.release(&record.service, pid, record.identity.as_deref()).await {
                    warn!(service = %record.service, pid, error = %e, "failed to release process");
                }
            }
            debug!(service = %record.service, "released recorded instance");
            released.push(record.service);
        }

        self.ledger.clear().await?;
        Ok(released)
    }

    /// Where each store service keeps its data: its first volume.
    fn store_addresses(manifest: &Manifest, bound: &BTreeMap<String, PathBuf>) -> BTreeMap<String, PathBuf> {
        manifest
            .services
            .iter()
            .filter(|s| s.role == ServiceRole::Store)
            .filter_map(|s| {
                let first = s.volumes.first()?;
                Some((s.name.clone(), bound.get(&first.name)?.clone()))
            })
            .collect()
    }

    fn plan_services(
        &self,
        manifest: &Manifest,
        build: &BuildReport,
        bound: &BTreeMap<String, PathBuf>,
    ) -> Vec<ServicePlan> {
        let stores = Self::store_addresses(manifest, bound);

        manifest
            .services
            .iter()
            .map(|spec| {
                let external = manifest.is_external(&spec.image);
                let built = build.built_image(&spec.image);

                let working_dir = built
                    .and_then(|image| image.layer_dir)
                    .or_else(|| external.then(|| manifest.base_dir.clone()));

                let environment = Self::service_environment(spec, bound, &stores);
                debug!(service = %spec.name, environment = ?redact_env(&environment), "planned service");

                ServicePlan {
                    spec: spec.clone(),
                    launch: LaunchSpec {
                        service: spec.name.clone(),
                        command: spec.command.clone(),
                        working_dir,
                        environment,
                        log_file: self.log_file(spec),
                    },
                }
            })
            .collect()
    }

    fn service_environment(
        spec: &ServiceSpec,
        bound: &BTreeMap<String, PathBuf>,
        stores: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, String> {
        let mut environment = ModuleRunner::resolve_environment(&spec.environment, stores);

        for binding in &spec.volumes {
            if let Some(path) = bound.get(&binding.name) {
                environment.insert(binding.target.clone(), path.display().to_string());
            }
        }

        // A store can probe itself through the same contract as the module.
        if spec.role == ServiceRole::Store {
            if let Some(address) = stores.get(&spec.name) {
                environment
                    .entry(STORE_HOST.to_string())
                    .or_insert_with(|| address.display().to_string());
            }
        }

        environment
    }

    fn log_file(&self, spec: &ServiceSpec) -> Option<PathBuf> {
        if spec.role == ServiceRole::Module {
            return None;
        }
        self.logs_dir.as_ref().map(|dir| service_log_path(dir, &spec.name))
    }

    /// Seed coordinates: the store's address plus credentials from the
    /// store's environment, then the module's, then defaults.
    fn plan_seed(&self, manifest: &Manifest, plans: &[ServicePlan]) -> Option<SeedPlan> {
        let spec = manifest.seed.clone()?;
        let store = plans.iter().find(|p| p.spec.name == spec.store)?;
        let host = store.launch.environment.get(STORE_HOST)?.clone();
        let module = plans.iter().find(|p| p.spec.role == ServiceRole::Module);

        let lookup = |key: &str| {
            store
                .launch
                .environment
                .get(key)
                .or_else(|| module.and_then(|m| m.launch.environment.get(key)))
                .cloned()
        };

        let location = StoreLocation {
            host,
            name: lookup(STORE_NAME).unwrap_or_else(|| spec.store.clone()),
            user: lookup(STORE_USER).unwrap_or_else(|| DEFAULT_STORE_CREDENTIAL.to_string()),
            password: lookup(STORE_PASSWORD).unwrap_or_else(|| DEFAULT_STORE_CREDENTIAL.to_string()),
        };
        debug!(store = %spec.store, location = ?location, "planned seeding");

        Some(SeedPlan {
            store: spec.store.clone(),
            spec,
            location,
        })
    }
}

/// The log file a service writes to under `logs_dir`.
pub fn service_log_path(logs_dir: &Path, service: &str) -> PathBuf {
    logs_dir.join(format!("{service}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ImageRef, VolumeBinding};

    fn spec(name: &str, role: ServiceRole) -> ServiceSpec {
        ServiceSpec {
            name: name.into(),
            image: ImageRef::new("base", "1"),
            role,
            command: None,
            depends_on: vec![],
            environment: BTreeMap::new(),
            healthcheck: None,
            volumes: vec![],
        }
    }

    #[test]
    fn test_store_gets_own_address_and_volume_target() {
        let mut store = spec("database", ServiceRole::Store);
        store.volumes.push(VolumeBinding {
            name: "pgdata".into(),
            target: "DATA_DIR".into(),
        });
        let bound = BTreeMap::from([("pgdata".to_string(), PathBuf::from("/s/volumes/pgdata"))]);
        let stores = BTreeMap::from([("database".to_string(), PathBuf::from("/s/volumes/pgdata"))]);

        let env = Orchestrator::service_environment(&store, &bound, &stores);
        assert_eq!(env["DATA_DIR"], "/s/volumes/pgdata");
        assert_eq!(env[STORE_HOST], "/s/volumes/pgdata");
    }

    #[test]
    fn test_module_store_host_resolved() {
        let mut module = spec("analysis", ServiceRole::Module);
        module.environment.insert(STORE_HOST.into(), "database".into());
        let stores = BTreeMap::from([("database".to_string(), PathBuf::from("/s/volumes/pgdata"))]);

        let env = Orchestrator::service_environment(&module, &BTreeMap::new(), &stores);
        assert_eq!(env[STORE_HOST], "/s/volumes/pgdata");
    }

    #[test]
    fn test_service_log_path() {
        assert_eq!(
            service_log_path(Path::new("/s/logs"), "database"),
            PathBuf::from("/s/logs/database.log")
        );
    }
}
