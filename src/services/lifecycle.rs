//! Service lifecycle controller.
//!
//! A single control loop owns every [`ServiceInstance`]. Health gates, the
//! seeder and the module waiter run as their own tasks and report back over
//! an mpsc channel; only the loop mutates instance state, and every change
//! goes through the transition table.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dependency_resolver::{DependencyGraph, DependencyResolver};
use super::health_gate::{HealthGate, HealthOutcome};
use super::module_runner::ModuleRunner;
use super::seeder::DataSeeder;
use crate::domain::errors::{OrchestratorError, RuntimeError, SeedError};
use crate::domain::models::{
    HealthProbeResult, SeedOutcome, SeedSpec, ServiceInstance, ServiceRole, ServiceSpec,
    ServiceState, StateTransition,
};
use crate::domain::ports::{InstanceRecord, InstanceRepository, LaunchSpec, ServiceRuntime, StoreLocation};

/// Everything needed to start one service.
#[derive(Debug, Clone)]
pub struct ServicePlan {
    pub spec: ServiceSpec,
    pub launch: LaunchSpec,
}

/// Seeding instructions bound to a concrete store location.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub store: String,
    pub spec: SeedSpec,
    pub location: StoreLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SeedStatus {
    NotRequired,
    Pending,
    Running,
    Done(SeedOutcome),
    Failed,
}

enum ControlEvent {
    HealthResolved { service: String, outcome: HealthOutcome },
    SeedFinished(Result<SeedOutcome, SeedError>),
    Exited { service: String, result: Result<i32, RuntimeError> },
}

/// Result of one controller run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub states: BTreeMap<String, ServiceState>,
    pub exit_codes: BTreeMap<String, i32>,
    pub seed: Option<SeedOutcome>,
    /// Fatal failures in the order they happened
    pub failures: Vec<OrchestratorError>,
    pub transitions: Vec<StateTransition>,
}

impl RunReport {
    /// 0, or the exit code of the first fatal failure.
    pub fn exit_code(&self) -> i32 {
        self.failures.first().map_or(0, OrchestratorError::exit_code)
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives services from `Defined` to `Running`/`Exited` in dependency order.
pub struct LifecycleController {
    runtime: Arc<dyn ServiceRuntime>,
    ledger: Arc<dyn InstanceRepository>,
    seeder: Arc<DataSeeder>,
    gate: HealthGate,
    module_runner: ModuleRunner,
    resolver: DependencyResolver,
    cancel: CancellationToken,

    plans: BTreeMap<String, ServicePlan>,
    graph: DependencyGraph,
    order: Vec<String>,
    instances: BTreeMap<String, ServiceInstance>,
    transitions: Vec<StateTransition>,
    seed: Option<SeedPlan>,
    seed_status: SeedStatus,
    exit_codes: BTreeMap<String, i32>,
    failures: Vec<OrchestratorError>,
}

impl LifecycleController {
    pub fn new(
        runtime: Arc<dyn ServiceRuntime>,
        ledger: Arc<dyn InstanceRepository>,
        seeder: Arc<DataSeeder>,
        plans: Vec<ServicePlan>,
        seed: Option<SeedPlan>,
    ) -> Result<Self, OrchestratorError> {
        let resolver = DependencyResolver::new();
        let graph: DependencyGraph = plans
            .iter()
            .map(|p| (p.spec.name.clone(), p.spec.depends_on.clone()))
            .collect();
        let order = resolver
            .topological_sort(&graph)
            .map_err(crate::domain::errors::ManifestError::ServiceCycle)?;

        let instances = plans
            .iter()
            .map(|p| (p.spec.name.clone(), ServiceInstance::new(p.spec.name.clone())))
            .collect();
        let plans = plans.into_iter().map(|p| (p.spec.name.clone(), p)).collect();
        let seed_status = if seed.is_some() {
            SeedStatus::Pending
        } else {
            SeedStatus::NotRequired
        };

        Ok(Self {
            gate: HealthGate::new(runtime.clone()),
            module_runner: ModuleRunner::new(runtime.clone()),
            runtime,
            ledger,
            seeder,
            resolver,
            cancel: CancellationToken::new(),
            plans,
            graph,
            order,
            instances,
            transitions: Vec::new(),
            seed,
            seed_status,
            exit_codes: BTreeMap::new(),
            failures: Vec::new(),
        })
    }

    /// Token that interrupts [`Self::run`] and every outstanding health gate.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn instance(&self, service: &str) -> Option<&ServiceInstance> {
        self.instances.get(service)
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Start everything that can start, and wait until nothing is in flight.
    ///
    /// Cancelling [`Self::cancellation`] ends the run early with
    /// [`OrchestratorError::Interrupted`]; the caller then tears down.
    pub async fn run(&mut self) -> RunReport {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pending = 0usize;
        let cancel = self.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                self.interrupted();
                break;
            }
            if let Err(e) = self.activate_ready(&tx, &mut pending).await {
                self.abort(e);
                break;
            }
            if pending == 0 {
                break;
            }

            let event = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    self.interrupted();
                    break;
                }
                event = rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            pending -= 1;

            if let Err(e) = self.handle_event(event, &tx, &mut pending).await {
                self.abort(e);
                break;
            }
        }

        if let Err(e) = self.fail_stranded().await {
            self.abort(e);
        }

        self.report()
    }

    /// Stop every non-terminal instance. Volumes are never touched here.
    pub async fn teardown(&mut self) {
        self.cancel.cancel();

        for name in self.order.clone().into_iter().rev() {
            let Some(state) = self.instances.get(&name).map(|i| i.state) else {
                continue;
            };
            if state.is_terminal() {
                continue;
            }

            if let Err(e) = self.transition(&name, ServiceState::Stopping).await {
                error!(service = %name, error = %e, "teardown transition rejected");
                continue;
            }
            self.stop_process(&name).await;
            if let Err(e) = self.transition(&name, ServiceState::Exited).await {
                error!(service = %name, error = %e, "teardown transition rejected");
            }
        }
    }

    fn report(&mut self) -> RunReport {
        RunReport {
            states: self
                .instances
                .iter()
                .map(|(name, inst)| (name.clone(), inst.state))
                .collect(),
            exit_codes: self.exit_codes.clone(),
            seed: match &self.seed_status {
                SeedStatus::Done(outcome) => Some(outcome.clone()),
                _ => None,
            },
            failures: std::mem::take(&mut self.failures),
            transitions: self.transitions.clone(),
        }
    }

    fn interrupted(&mut self) {
        warn!("lifecycle run cancelled");
        self.failures.push(OrchestratorError::Interrupted);
    }

    fn abort(&mut self, err: OrchestratorError) {
        error!(error = %err, "lifecycle control loop aborted");
        self.cancel.cancel();
        self.failures.push(err);
    }

    fn state(&self, name: &str) -> ServiceState {
        self.instances.get(name).map(|i| i.state).unwrap_or_default()
    }

    fn is_module(&self, name: &str) -> bool {
        self.plans
            .get(name)
            .is_some_and(|p| p.spec.role == ServiceRole::Module)
    }

    /// A service may leave `Defined` once every dependency is ready and,
    /// for the module, once seeding is done.
    fn can_start(&self, name: &str) -> bool {
        let Some(plan) = self.plans.get(name) else {
            return false;
        };
        let dependencies_ready = plan
            .spec
            .depends_on
            .iter()
            .all(|dep| self.instances.get(dep).is_some_and(ServiceInstance::is_ready));
        let seed_ready = !self.is_module(name)
            || matches!(self.seed_status, SeedStatus::NotRequired | SeedStatus::Done(_));

        dependencies_ready && seed_ready
    }

    async fn activate_ready(
        &mut self,
        tx: &mpsc::UnboundedSender<ControlEvent>,
        pending: &mut usize,
    ) -> Result<(), OrchestratorError> {
        loop {
            let next = self
                .order
                .iter()
                .find(|name| self.state(name) == ServiceState::Defined && self.can_start(name))
                .cloned();

            match next {
                Some(name) => self.start_service(&name, tx, pending).await?,
                None => return Ok(()),
            }
        }
    }

    async fn start_service(
        &mut self,
        name: &str,
        tx: &mpsc::UnboundedSender<ControlEvent>,
        pending: &mut usize,
    ) -> Result<(), OrchestratorError> {
        let plan = self
            .plans
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::StartFailed {
                service: name.to_string(),
                reason: "no launch plan".to_string(),
            })?;

        // Images are built before the controller exists.
        self.transition(name, ServiceState::Building).await?;
        self.transition(name, ServiceState::Built).await?;
        self.transition(name, ServiceState::Starting).await?;

        let handle = match self.runtime.start(&plan.launch).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = OrchestratorError::StartFailed {
                    service: name.to_string(),
                    reason: e.to_string(),
                };
                return self.fail(name, err).await;
            }
        };

        if let Some(instance) = self.instances.get_mut(name) {
            instance.handle = Some(handle.clone());
            instance.started_at = Some(Utc::now());
        }
        self.record(name).await;

        match plan.spec.healthcheck {
            Some(check) => {
                self.transition(name, ServiceState::AwaitingHealth).await?;
                let gate = self.gate.clone();
                let cancel = self.cancel.clone();
                let tx = tx.clone();
                let service = name.to_string();
                *pending += 1;
                tokio::spawn(async move {
                    let outcome = gate.wait_until_healthy(&handle, &check, &cancel).await;
                    let _ = tx.send(ControlEvent::HealthResolved { service, outcome });
                });
            }
            None => {
                // No probe: ready as soon as it runs.
                self.transition(name, ServiceState::Running).await?;
                self.mark_ready(name, tx, pending);
            }
        }

        Ok(())
    }

    /// The instance may now be depended upon.
    fn mark_ready(&mut self, name: &str, tx: &mpsc::UnboundedSender<ControlEvent>, pending: &mut usize) {
        if let Some(instance) = self.instances.get_mut(name) {
            instance.ready_at = Some(Utc::now());
        }

        if self.is_module(name) {
            self.spawn_module_waiter(name, tx, pending);
        }

        let seeds_this_store = self.seed.as_ref().is_some_and(|s| s.store == name);
        if seeds_this_store && self.seed_status == SeedStatus::Pending {
            self.spawn_seeding(tx, pending);
        }
    }

    fn spawn_module_waiter(&self, name: &str, tx: &mpsc::UnboundedSender<ControlEvent>, pending: &mut usize) {
        let Some(handle) = self.instances.get(name).and_then(|i| i.handle.clone()) else {
            return;
        };
        let runner = self.module_runner.clone();
        let tx = tx.clone();
        let service = name.to_string();
        *pending += 1;
        tokio::spawn(async move {
            let result = runner.await_exit(&handle).await;
            let _ = tx.send(ControlEvent::Exited { service, result });
        });
    }

    fn spawn_seeding(&mut self, tx: &mpsc::UnboundedSender<ControlEvent>, pending: &mut usize) {
        let Some(plan) = self.seed.clone() else {
            return;
        };
        self.seed_status = SeedStatus::Running;
        info!(store = %plan.store, dataset = %plan.spec.dataset.display(), "seeding store");

        let seeder = self.seeder.clone();
        let tx = tx.clone();
        *pending += 1;
        tokio::spawn(async move {
            let result = seeder.run(&plan.store, &plan.spec, &plan.location).await;
            let _ = tx.send(ControlEvent::SeedFinished(result));
        });
    }

    async fn handle_event(
        &mut self,
        event: ControlEvent,
        tx: &mpsc::UnboundedSender<ControlEvent>,
        pending: &mut usize,
    ) -> Result<(), OrchestratorError> {
        match event {
            ControlEvent::HealthResolved { service, outcome } => {
                self.on_health(&service, outcome, tx, pending).await
            }
            ControlEvent::SeedFinished(result) => self.on_seed(result).await,
            ControlEvent::Exited { service, result } => self.on_exit(&service, result).await,
        }
    }

    async fn on_health(
        &mut self,
        name: &str,
        outcome: HealthOutcome,
        tx: &mpsc::UnboundedSender<ControlEvent>,
        pending: &mut usize,
    ) -> Result<(), OrchestratorError> {
        match outcome {
            HealthOutcome::Healthy { attempts, .. } => {
                self.set_health(name, true, attempts);
                self.transition(name, ServiceState::Healthy).await?;
                self.transition(name, ServiceState::Running).await?;
                self.mark_ready(name, tx, pending);
                Ok(())
            }
            HealthOutcome::Exhausted(err) => {
                self.set_health(name, false, err.attempts);
                self.fail(name, err.into()).await
            }
            HealthOutcome::Cancelled => {
                debug!(service = %name, "health gate cancelled");
                Ok(())
            }
        }
    }

    async fn on_seed(&mut self, result: Result<SeedOutcome, SeedError>) -> Result<(), OrchestratorError> {
        match result {
            Ok(outcome) => {
                self.seed_status = SeedStatus::Done(outcome);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "seeding failed");
                self.seed_status = SeedStatus::Failed;
                self.failures.push(err.into());
                self.fail_module_waiting_on_seed("seeding failed").await
            }
        }
    }

    async fn on_exit(&mut self, name: &str, result: Result<i32, RuntimeError>) -> Result<(), OrchestratorError> {
        match result {
            Ok(code) => {
                self.exit_codes.insert(name.to_string(), code);
                if let Some(instance) = self.instances.get_mut(name) {
                    instance.exit_code = Some(code);
                }
                self.transition(name, ServiceState::Exited).await?;
                self.stop_process(name).await;

                if let Err(failure) = ModuleRunner::outcome(name, code) {
                    if let Some(instance) = self.instances.get_mut(name) {
                        instance.failure = Some(failure.to_string());
                    }
                    self.failures.push(failure.into());

                    let reason = format!("dependency '{name}' exited with {code}");
                    for dependent in self.resolver.transitive_dependents(&self.graph, name) {
                        self.fail_unstarted(&dependent, &reason).await?;
                    }
                }
                Ok(())
            }
            Err(err) => {
                if let Some(instance) = self.instances.get_mut(name) {
                    instance.failure = Some(err.to_string());
                }
                self.transition(name, ServiceState::Exited).await?;
                self.forget(name).await;
                self.failures.push(err.into());
                Ok(())
            }
        }
    }

    fn set_health(&mut self, name: &str, healthy: bool, attempts: u32) {
        if let Some(instance) = self.instances.get_mut(name) {
            instance.last_health = Some(HealthProbeResult {
                healthy,
                attempts,
                at: Utc::now(),
            });
        }
    }

    /// Fail `name`, stop its process and fail everything waiting on it.
    async fn fail(&mut self, name: &str, err: OrchestratorError) -> Result<(), OrchestratorError> {
        warn!(service = %name, error = %err, "service failed");
        if let Some(instance) = self.instances.get_mut(name) {
            instance.failure = Some(err.to_string());
        }
        self.transition(name, ServiceState::Failed).await?;
        self.release_failed(name).await;
        self.failures.push(err);

        let reason = format!("dependency '{name}' failed");
        for dependent in self.resolver.transitive_dependents(&self.graph, name) {
            self.fail_unstarted(&dependent, &reason).await?;
        }

        let seeds_this_store = self.seed.as_ref().is_some_and(|s| s.store == name);
        if seeds_this_store && self.seed_status == SeedStatus::Pending {
            self.seed_status = SeedStatus::Failed;
            self.fail_module_waiting_on_seed(&format!("store '{name}' failed")).await?;
        }

        Ok(())
    }

    /// Move a service that never started straight to `Failed`.
    async fn fail_unstarted(&mut self, name: &str, reason: &str) -> Result<(), OrchestratorError> {
        if self.state(name) != ServiceState::Defined {
            return Ok(());
        }
        info!(service = %name, reason, "not starting service");
        if let Some(instance) = self.instances.get_mut(name) {
            instance.failure = Some(reason.to_string());
        }
        self.transition(name, ServiceState::Failed).await
    }

    async fn fail_module_waiting_on_seed(&mut self, reason: &str) -> Result<(), OrchestratorError> {
        let modules: Vec<String> = self
            .order
            .iter()
            .filter(|name| self.is_module(name))
            .cloned()
            .collect();

        for module in modules {
            self.fail_unstarted(&module, reason).await?;
            for dependent in self.resolver.transitive_dependents(&self.graph, &module) {
                self.fail_unstarted(&dependent, reason).await?;
            }
        }
        Ok(())
    }

    /// Anything still `Defined` once the loop is idle can never start.
    async fn fail_stranded(&mut self) -> Result<(), OrchestratorError> {
        let stranded: Vec<String> = self
            .order
            .iter()
            .filter(|name| self.state(name) == ServiceState::Defined)
            .cloned()
            .collect();

        for name in stranded {
            if self.cancel.is_cancelled() {
                self.fail_unstarted(&name, "run aborted").await?;
            } else {
                let err = OrchestratorError::StartFailed {
                    service: name.clone(),
                    reason: "dependencies never became ready".to_string(),
                };
                self.fail(&name, err).await?;
            }
        }
        Ok(())
    }

    async fn transition(&mut self, name: &str, to: ServiceState) -> Result<(), OrchestratorError> {
        let instance = self
            .instances
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::StartFailed {
                service: name.to_string(),
                reason: "unknown service".to_string(),
            })?;

        let from = instance.state;
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                service: name.to_string(),
                from,
                to,
            });
        }

        instance.state = to;
        info!(service = %name, from = %from, to = %to, "service state changed");
        self.transitions.push(StateTransition {
            service: name.to_string(),
            from,
            to,
            at: Utc::now(),
        });

        if !to.is_terminal() {
            self.record(name).await;
        }
        Ok(())
    }

    /// Persist a started instance so a later `down` can find it.
    async fn record(&self, name: &str) {
        let Some(instance) = self.instances.get(name) else {
            return;
        };
        let Some(handle) = &instance.handle else {
            return;
        };

        let record = InstanceRecord {
            id: handle.instance_id,
            service: name.to_string(),
            pid: handle.pid,
            identity: handle.identity.clone(),
            state: instance.state,
            started_at: instance.started_at.unwrap_or_else(Utc::now),
        };
        if let Err(e) = self.ledger.upsert(&record).await {
            warn!(service = %name, error = %e, "failed to record instance");
        }
    }

    async fn forget(&self, name: &str) {
        let Some(handle) = self.instances.get(name).and_then(|i| i.handle.as_ref()) else {
            return;
        };
        if let Err(e) = self.ledger.remove(handle.instance_id).await {
            warn!(service = %name, error = %e, "failed to remove instance record");
        }
    }

    async fn stop_process(&self, name: &str) {
        let Some(handle) = self.instances.get(name).and_then(|i| i.handle.clone()) else {
            return;
        };
        if let Err(e) = self.runtime.stop(&handle).await {
            warn!(service = %name, error = %e, "failed to stop service");
        }
        self.forget(name).await;
    }

    /// A failed instance keeps no process: stop it if one was started.
    async fn release_failed(&mut self, name: &str) {
        self.stop_process(name).await;
        if let Some(instance) = self.instances.get_mut(name) {
            instance.handle = None;
        }
    }
}
