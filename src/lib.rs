//! Keel - manifest-driven pipeline orchestrator
//!
//! Keel reads a declarative manifest of images and services, builds the
//! images as content-fingerprinted layers, starts services in dependency
//! order behind health gates, seeds the data store exactly once per dataset
//! version and runs a single computation module against it.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Manifest, image and service models, errors and ports
//! - **Adapters** (`adapters`): Layer builder, host process runtime, SQLite stores
//! - **Service Layer** (`services`): Build graph, lifecycle, health gate, seeder
//! - **Modules** (`modules`): Built-in computation modules run inside the pipeline
//! - **Infrastructure Layer** (`infrastructure`): Configuration, logging, volumes
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use keel::cli::open_orchestrator;
//! use keel::services::ManifestLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = keel::ConfigLoader::load()?;
//!     let manifest = ManifestLoader::new().load_path("keel.yaml".as_ref())?;
//!     let report = open_orchestrator(&config).await?.up(&manifest).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod modules;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{ManifestError, OrchestratorError};
pub use domain::models::{Config, ImageRef, Manifest, ServiceSpec, ServiceState};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    BuildGraphEngine, DataSeeder, HealthGate, LifecycleController, ManifestLoader, ModuleRunner, Orchestrator,
};
