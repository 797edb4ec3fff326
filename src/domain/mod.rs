//! Domain layer for the keel orchestrator
//!
//! This module contains the manifest, image and service models, the error
//! taxonomy and the port traits adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    BuildError, HealthTimeoutError, ManifestError, ModuleFailure, OrchestratorError, RuntimeError,
    SeedError, StateError,
};
