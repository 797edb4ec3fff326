//! Service domain model.
//!
//! A [`ServiceSpec`] is the declared, immutable definition. A
//! [`ServiceInstance`] is its runtime projection, owned by the lifecycle
//! controller and moved through [`ServiceState`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image::ImageRef;

/// Environment keys every computation module consumes.
pub const STORE_HOST: &str = "STORE_HOST";
pub const STORE_NAME: &str = "STORE_NAME";
pub const STORE_USER: &str = "STORE_USER";
pub const STORE_PASSWORD: &str = "STORE_PASSWORD";

/// The documented module environment contract.
pub const MODULE_ENV_CONTRACT: [&str; 4] = [STORE_HOST, STORE_NAME, STORE_USER, STORE_PASSWORD];

/// What part a service plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    /// Plain long-running service
    #[default]
    Service,
    /// The relational store the seeder populates
    Store,
    /// The swappable one-shot computation module
    Module,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Store => "store",
            Self::Module => "module",
        }
    }
}

/// Readiness probe descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Probe command (argv)
    pub test: Vec<String>,
    pub interval: Duration,
    /// Bound on a single probe
    pub timeout: Duration,
    /// Probe attempts before the service is declared failed
    pub retries: u32,
}

/// A named volume bound into a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub name: String,
    /// Environment key that receives the volume directory
    pub target: String,
}

impl VolumeBinding {
    /// Default environment key for a volume: `KEEL_VOLUME_<NAME>`.
    pub fn default_target(name: &str) -> String {
        let upper: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("KEEL_VOLUME_{upper}")
    }
}

/// Validated, immutable service definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub image: ImageRef,
    pub role: ServiceRole,
    /// Process to run; `None` makes the service passive
    pub command: Option<Vec<String>>,
    pub depends_on: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub healthcheck: Option<HealthCheck>,
    pub volumes: Vec<VolumeBinding>,
}

/// Lifecycle state of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Defined,
    Building,
    Built,
    Starting,
    AwaitingHealth,
    Healthy,
    Running,
    Stopping,
    Exited,
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defined => "defined",
            Self::Building => "building",
            Self::Built => "built",
            Self::Starting => "starting",
            Self::AwaitingHealth => "awaiting_health",
            Self::Healthy => "healthy",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Exited => "exited",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "defined" => Some(Self::Defined),
            "building" => Some(Self::Building),
            "built" => Some(Self::Built),
            "starting" => Some(Self::Starting),
            "awaiting_health" => Some(Self::AwaitingHealth),
            "healthy" => Some(Self::Healthy),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "exited" => Some(Self::Exited),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Failed)
    }

    /// Valid transitions from this state.
    ///
    /// `Defined` and `Built` may fail without starting when a dependency
    /// fails. Every non-terminal state may be stopped.
    pub fn valid_transitions(&self) -> Vec<ServiceState> {
        match self {
            Self::Defined => vec![Self::Building, Self::Failed, Self::Stopping],
            Self::Building => vec![Self::Built, Self::Failed, Self::Stopping],
            Self::Built => vec![Self::Starting, Self::Failed, Self::Stopping],
            Self::Starting => vec![
                Self::AwaitingHealth,
                Self::Running,
                Self::Failed,
                Self::Stopping,
            ],
            Self::AwaitingHealth => vec![Self::Healthy, Self::Failed, Self::Stopping],
            Self::Healthy => vec![Self::Running, Self::Stopping],
            Self::Running => vec![Self::Exited, Self::Stopping],
            Self::Stopping => vec![Self::Exited],
            Self::Exited | Self::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a started service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub instance_id: Uuid,
    pub service: String,
    /// OS process id; `None` for passive services
    pub pid: Option<u32>,
    /// Boot id and start time of `pid`, checked before a later invocation
    /// signals the recorded pid
    pub identity: Option<String>,
}

/// Result of the most recent health evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbeResult {
    pub healthy: bool,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub service: String,
    pub from: ServiceState,
    pub to: ServiceState,
    pub at: DateTime<Utc>,
}

/// Runtime projection of a [`ServiceSpec`].
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub id: Uuid,
    pub service: String,
    pub state: ServiceState,
    pub handle: Option<ServiceHandle>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health: Option<HealthProbeResult>,
    /// Set once the instance may be depended upon
    pub ready_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub failure: Option<String>,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            state: ServiceState::Defined,
            handle: None,
            started_at: None,
            last_health: None,
            ready_at: None,
            exit_code: None,
            failure: None,
        }
    }

    /// Whether dependents may start. Stays true after a one-shot service
    /// exits cleanly; a non-zero exit withdraws it.
    pub fn is_ready(&self) -> bool {
        self.ready_at.is_some() && self.state != ServiceState::Failed && self.exit_code.is_none_or(|code| code == 0)
    }
}
