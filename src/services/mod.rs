//! Orchestration services.
//!
//! Each component depends only on the domain ports, so it can be driven by
//! the real adapters or by in-memory fakes.

pub mod build_graph;
pub mod dependency_resolver;
pub mod health_gate;
pub mod lifecycle;
pub mod manifest_loader;
pub mod module_runner;
pub mod orchestrator;
pub mod seeder;

pub use build_graph::{compute_fingerprint, BuildGraphEngine, BuildReport, BuildStatus, ImageBuildResult};
pub use dependency_resolver::{DependencyGraph, DependencyResolver};
pub use health_gate::{HealthGate, HealthOutcome};
pub use lifecycle::{LifecycleController, RunReport, SeedPlan, ServicePlan};
pub use manifest_loader::ManifestLoader;
pub use module_runner::ModuleRunner;
pub use orchestrator::{DownReport, Orchestrator, StatusReport, UpReport};
pub use seeder::{load_dataset, parse_dataset, DataSeeder};
