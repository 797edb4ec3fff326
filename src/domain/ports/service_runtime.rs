use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::RuntimeError;
use crate::domain::models::{HealthCheck, ServiceHandle};

/// Everything a runtime needs to start one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub service: String,
    /// Process argv; `None` starts a passive instance with no process
    pub command: Option<Vec<String>>,
    /// Working directory, normally the service image's layer
    pub working_dir: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    /// Redirect stdout and stderr here; `None` inherits the caller's
    pub log_file: Option<PathBuf>,
}

/// Port for the isolated process environment services run in.
///
/// The orchestrator is generic over this trait so the lifecycle can be
/// driven against real processes or an in-memory fake.
#[async_trait]
pub trait ServiceRuntime: Send + Sync {
    /// Start the service and return its handle.
    async fn start(&self, launch: &LaunchSpec) -> Result<ServiceHandle, RuntimeError>;

    /// Run one readiness probe. `Ok(false)` means the probe ran and failed.
    async fn probe(&self, handle: &ServiceHandle, check: &HealthCheck) -> Result<bool, RuntimeError>;

    /// Wait for the service to terminate and return its exit code.
    async fn wait(&self, handle: &ServiceHandle) -> Result<i32, RuntimeError>;

    /// Stop a service started by this runtime.
    async fn stop(&self, handle: &ServiceHandle) -> Result<(), RuntimeError>;

    /// Stop a process recorded by an earlier invocation.
    ///
    /// Nothing is signalled unless `pid` still carries the recorded
    /// `identity`.
    async fn release(&self, service: &str, pid: u32, identity: Option<&str>) -> Result<(), RuntimeError>;
}
