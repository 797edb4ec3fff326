//! Domain errors for the keel orchestrator.
//!
//! Each component owns a narrow error type; [`OrchestratorError`] aggregates
//! them and maps every fatal condition to the process exit code.

use std::time::Duration;

use thiserror::Error;

use super::models::ServiceState;

/// Format a cycle path as a human-readable string: `a -> b -> a`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

fn format_build_errors(errors: &[BuildError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Structural or validation failure in the manifest. Always raised before
/// any build or start side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Parse(String),

    #[error("{kind} name cannot be empty")]
    EmptyName { kind: &'static str },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("invalid image reference '{0}'")]
    InvalidImageRef(String),

    #[error("service '{service}' references unknown image '{image}'")]
    UnresolvedImage { service: String, image: String },

    #[error("image '{image}' has unknown parent '{parent}'")]
    UnresolvedParent { image: String, parent: String },

    #[error("image '{image}' has an empty build step at position {step}")]
    EmptyBuildStep { image: String, step: usize },

    #[error("service '{service}' declares an empty command")]
    EmptyCommand { service: String },

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("service dependency cycle detected: {}", format_cycle_path(.0))]
    ServiceCycle(Vec<String>),

    #[error("image parent cycle detected: {}", format_cycle_path(.0))]
    ImageCycle(Vec<String>),

    #[error("service '{service}' has an invalid health check: {reason}")]
    InvalidHealthCheck { service: String, reason: String },

    #[error("service '{service}' has an invalid volume binding '{volume}': {reason}")]
    InvalidVolume {
        service: String,
        volume: String,
        reason: String,
    },

    #[error("more than one service declares role '{role}': '{first}' and '{second}'")]
    DuplicateRole {
        role: &'static str,
        first: String,
        second: String,
    },

    #[error("service '{service}' violates the module contract: {reason}")]
    ModuleContract { service: String, reason: String },

    #[error("invalid seed section: {0}")]
    InvalidSeed(String),
}

/// Failure building one image. Fatal for that image and its descendants only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("image '{image}' failed to build: {reason}")]
    Failed { image: String, reason: String },

    #[error("image '{image}' was not built because parent '{parent}' failed")]
    ParentFailed { image: String, parent: String },
}

/// A health gate exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service '{service}' did not become healthy after {attempts} attempts ({elapsed:?})")]
pub struct HealthTimeoutError {
    pub service: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Seeding failed; the store is left unseeded and the load may be retried.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("dataset {path} could not be read: {reason}")]
    Dataset { path: String, reason: String },

    #[error("malformed record at line {line} ({record}): {reason}")]
    MalformedRecord {
        line: u64,
        record: String,
        reason: String,
    },

    #[error("store '{service}' is not usable for seeding: {reason}")]
    StoreUnavailable { service: String, reason: String },

    #[error("store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for SeedError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// The computation module terminated with a non-zero status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module '{service}' exited with status {code}")]
pub struct ModuleFailure {
    pub service: String,
    pub code: i32,
}

/// Errors raised by a [`crate::domain::ports::ServiceRuntime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn service '{service}': {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service '{0}' is not managed by this runtime")]
    UnknownInstance(String),

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("runtime i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the orchestrator's own state (build cache, instance ledger, volumes).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("state serialization error: {0}")]
    Serialization(String),

    #[error("state i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Aggregated orchestrator failure. The first fatal one decides the exit code.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("build failed: {}", format_build_errors(.0))]
    Build(Vec<BuildError>),

    #[error(transparent)]
    HealthTimeout(#[from] HealthTimeoutError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Module(#[from] ModuleFailure),

    #[error("service '{service}' failed to start: {reason}")]
    StartFailed { service: String, reason: String },

    #[error("invalid state transition for '{service}' from {from} to {to}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("interrupted")]
    Interrupted,
}

impl OrchestratorError {
    /// Process exit code for this failure.
    ///
    /// Module failures surface the module's own status unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Manifest(_) => 2,
            Self::Build(_) => 3,
            Self::HealthTimeout(_) => 4,
            Self::Seed(_) => 5,
            Self::Module(failure) if failure.code != 0 => failure.code,
            Self::Module(_)
            | Self::StartFailed { .. }
            | Self::InvalidTransition { .. }
            | Self::Runtime(_)
            | Self::State(_) => 1,
            Self::Interrupted => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_path_formatting() {
        let err = ManifestError::ServiceCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(
            err.to_string(),
            "service dependency cycle detected: a -> b -> a"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            OrchestratorError::from(ManifestError::InvalidSeed("x".into())).exit_code(),
            2
        );
        assert_eq!(OrchestratorError::Build(vec![]).exit_code(), 3);
        assert_eq!(
            OrchestratorError::from(HealthTimeoutError {
                service: "db".into(),
                attempts: 3,
                elapsed: Duration::from_secs(1),
            })
            .exit_code(),
            4
        );
        assert_eq!(
            OrchestratorError::from(SeedError::Store("locked".into())).exit_code(),
            5
        );
        assert_eq!(
            OrchestratorError::from(ModuleFailure {
                service: "analysis".into(),
                code: 42,
            })
            .exit_code(),
            42
        );
        assert_eq!(OrchestratorError::Interrupted.exit_code(), 130);
    }
}
