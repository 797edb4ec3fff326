//! Implementation of the `keel build` command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::{load_manifest, open_orchestrator, Cli};
use crate::domain::errors::OrchestratorError;
use crate::domain::models::Config;
use crate::services::ImageBuildResult;

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Reuse layers whose fingerprint is unchanged instead of rebuilding
    #[arg(long)]
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct BuildOutput {
    pub success: bool,
    pub images: Vec<ImageBuildResult>,
}

impl CommandOutput for BuildOutput {
    fn to_human(&self) -> String {
        if self.images.is_empty() {
            return "No images declared".to_string();
        }
        TableFormatter::new().format_builds(&self.images)
    }
}

pub async fn execute(args: &BuildArgs, cli: &Cli, config: &Config) -> Result<i32> {
    let manifest = load_manifest(&cli.manifest_path(config))?;
    let orchestrator = open_orchestrator(config).await?;

    let report = orchestrator.build(&manifest, !args.cached).await?;
    output(
        &BuildOutput {
            success: report.is_success(),
            images: report.results.clone(),
        },
        cli.json,
    );

    if report.is_success() {
        Ok(0)
    } else {
        Err(OrchestratorError::Build(report.errors()).into())
    }
}
