//! Implementation of the `keel up` command.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::{load_manifest, open_orchestrator, Cli};
use crate::domain::models::{Config, SeedOutcome, ServiceState};
use crate::services::{ImageBuildResult, UpReport};

#[derive(Args, Debug, Default)]
pub struct UpArgs {}

#[derive(Debug, Serialize)]
pub struct SeedSummary {
    pub version: String,
    pub rows: u64,
    /// False when the store already held this version
    pub loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct UpOutput {
    pub success: bool,
    pub exit_code: i32,
    pub released: Vec<String>,
    pub images: Vec<ImageBuildResult>,
    pub services: BTreeMap<String, ServiceState>,
    pub exit_codes: BTreeMap<String, i32>,
    pub seed: Option<SeedSummary>,
    pub failures: Vec<String>,
}

impl From<&UpReport> for UpOutput {
    fn from(report: &UpReport) -> Self {
        Self {
            success: report.run.is_success(),
            exit_code: report.exit_code(),
            released: report.released.clone(),
            images: report.build.results.clone(),
            services: report.run.states.clone(),
            exit_codes: report.run.exit_codes.clone(),
            seed: report.run.seed.as_ref().map(|outcome| SeedSummary {
                version: outcome.version().to_string(),
                rows: outcome.rows(),
                loaded: matches!(outcome, SeedOutcome::Seeded { .. }),
            }),
            failures: report.run.failures.iter().map(ToString::to_string).collect(),
        }
    }
}

impl CommandOutput for UpOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut lines = Vec::new();

        if !self.released.is_empty() {
            lines.push(format!("Stopped {} instance(s) from a previous run", self.released.len()));
        }
        if !self.images.is_empty() {
            lines.push(formatter.format_builds(&self.images));
        }
        if let Some(seed) = &self.seed {
            lines.push(if seed.loaded {
                format!("Seeded {} rows (dataset version {})", seed.rows, seed.version)
            } else {
                format!("Store already seeded with version {} ({} rows)", seed.version, seed.rows)
            });
        }
        lines.push(formatter.format_states(&self.services, &self.exit_codes));

        if self.success {
            lines.push(format!("{} pipeline is up", console::style("✓").green().bold()));
        } else {
            for failure in &self.failures {
                lines.push(format!("{} {failure}", console::style("✗").red().bold()));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(_args: &UpArgs, cli: &Cli, config: &Config) -> Result<i32> {
    let manifest = load_manifest(&cli.manifest_path(config))?;
    let orchestrator = open_orchestrator(config).await?;

    let report = orchestrator.up(&manifest).await?;
    output(&UpOutput::from(&report), cli.json);
    Ok(report.exit_code())
}
