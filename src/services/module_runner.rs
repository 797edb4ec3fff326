//! Module runner: environment injection and outcome capture for the
//! swappable computation module.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::errors::{ModuleFailure, RuntimeError};
use crate::domain::models::{ServiceHandle, STORE_HOST};
use crate::domain::ports::ServiceRuntime;

/// Runs the module to completion and reports its exit status unchanged.
#[derive(Clone)]
pub struct ModuleRunner {
    runtime: Arc<dyn ServiceRuntime>,
}

impl ModuleRunner {
    pub fn new(runtime: Arc<dyn ServiceRuntime>) -> Self {
        Self { runtime }
    }

    /// Resolve a `STORE_HOST` that names a declared store service to that
    /// store's address, the way a container network resolves host names.
    ///
    /// Values that name no known store pass through untouched.
    pub fn resolve_environment(
        environment: &BTreeMap<String, String>,
        store_addresses: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, String> {
        let mut resolved = environment.clone();
        if let Some(host) = environment.get(STORE_HOST) {
            if let Some(address) = store_addresses.get(host) {
                resolved.insert(STORE_HOST.to_string(), address.display().to_string());
            }
        }
        resolved
    }

    /// Wait for the module process to finish. Never retried.
    pub async fn await_exit(&self, handle: &ServiceHandle) -> Result<i32, RuntimeError> {
        let code = self.runtime.wait(handle).await?;
        if code == 0 {
            info!(service = %handle.service, "module completed");
        } else {
            warn!(service = %handle.service, code, "module failed");
        }
        Ok(code)
    }

    /// Map an exit status to the module outcome.
    pub fn outcome(service: &str, code: i32) -> Result<(), ModuleFailure> {
        if code == 0 {
            Ok(())
        } else {
            Err(ModuleFailure {
                service: service.to_string(),
                code,
            })
        }
    }
}
