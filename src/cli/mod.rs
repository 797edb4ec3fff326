//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::builder::LayerImageBuilder;
use crate::adapters::runtime::ProcessRuntime;
use crate::adapters::sqlite::{initialize_database, SqliteBuildCache, SqliteInstanceRepository, SqliteStoreConnector};
use crate::domain::errors::OrchestratorError;
use crate::domain::models::{Config, Manifest};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::VolumeManager;
use crate::modules::ModuleError;
use crate::services::{ManifestLoader, Orchestrator};

use commands::{build::BuildArgs, down::DownArgs, module::ModuleArgs, store::StoreCommands, up::UpArgs};

#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "Manifest-driven pipeline orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Manifest file (defaults to the configured `manifest`, `keel.yaml`)
    #[arg(short = 'f', long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Configuration file (defaults to `.keel/config.yaml` + `.keel/local.yaml`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build images, start services, seed the store and run the module
    Up(UpArgs),

    /// Stop every service started by `up`
    Down(DownArgs),

    /// Rebuild images (ignores the build cache unless --cached)
    Build(BuildArgs),

    /// Show recorded instances, image tags and volumes
    Status,

    /// Run a built-in computation module against the store
    Module(ModuleArgs),

    /// Store utilities
    #[command(subcommand)]
    Store(StoreCommands),
}

impl Cli {
    /// Load configuration from `--config` or the project hierarchy.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(),
        }
    }

    /// Level override from `-v`.
    pub const fn verbosity_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }

    pub fn manifest_path(&self, config: &Config) -> PathBuf {
        self.manifest.clone().unwrap_or_else(|| PathBuf::from(&config.manifest))
    }
}

/// Run a parsed command and return the process exit code.
pub async fn run(cli: Cli, config: Config) -> i32 {
    let json = cli.json;
    let result = match &cli.command {
        Commands::Up(args) => commands::up::execute(args, &cli, &config).await,
        Commands::Down(args) => commands::down::execute(args, &cli, &config).await,
        Commands::Build(args) => commands::build::execute(args, &cli, &config).await,
        Commands::Status => commands::status::execute(&config, json).await,
        Commands::Module(args) => commands::module::execute(args, json).await,
        Commands::Store(command) => commands::store::execute(command, json).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => handle_error(&err, json),
    }
}

/// Report an error and map it to an exit code.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> i32 {
    let code = exit_code_for(err);
    if json_mode {
        let body = serde_json::json!({
            "error": format!("{err:#}"),
            "exit_code": code,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
    code
}

/// Exit code of the first recognised failure in the error chain.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<ModuleError>() {
        return e.exit_code();
    }
    1
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    ManifestLoader::new()
        .load_path(path)
        .map_err(OrchestratorError::from)
        .with_context(|| format!("invalid manifest {}", path.display()))
}

/// Wire the orchestrator to the on-disk state under `state_dir`.
pub async fn open_orchestrator(config: &Config) -> Result<Orchestrator> {
    let pool = initialize_database(&config.database_path(), config.database.max_connections)
        .await
        .with_context(|| format!("failed to open state database {}", config.database_path().display()))?;

    let runtime = ProcessRuntime::new(Duration::from_secs(config.runtime.stop_timeout_secs));
    let volumes = VolumeManager::new(config.volumes_dir()).context("failed to resolve volume directory")?;
    let builder = LayerImageBuilder::new(config.layers_dir()).context("failed to resolve layer directory")?;

    Ok(Orchestrator::new(
        Arc::new(builder),
        Arc::new(SqliteBuildCache::new(pool.clone())),
        Arc::new(runtime),
        Arc::new(SqliteInstanceRepository::new(pool)),
        Arc::new(SqliteStoreConnector),
        volumes,
    )
    .with_logs_dir(config.logs_dir())
    .with_max_parallel(config.build.max_parallel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ManifestError, ModuleFailure};

    #[test]
    fn test_exit_code_survives_context() {
        let err = anyhow::Error::from(OrchestratorError::from(ManifestError::InvalidSeed("x".into())))
            .context("invalid manifest keel.yaml");
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_module_failure_code_passes_through() {
        let err = anyhow::Error::from(OrchestratorError::from(ModuleFailure {
            service: "analysis".into(),
            code: 7,
        }));
        assert_eq!(exit_code_for(&err), 7);
    }

    #[test]
    fn test_unknown_errors_exit_one() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("disk full")), 1);
    }
}
