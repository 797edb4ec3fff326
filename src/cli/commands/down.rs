//! Implementation of the `keel down` command.

use anyhow::Result;
use clap::Args;

use crate::cli::output::{output, CommandOutput};
use crate::cli::{load_manifest, open_orchestrator, Cli};
use crate::domain::models::Config;
use crate::services::DownReport;

#[derive(Args, Debug, Default)]
pub struct DownArgs {
    /// Also delete the pipeline's volumes, including the seeded store
    #[arg(long)]
    pub purge: bool,
}

impl CommandOutput for DownReport {
    fn to_human(&self) -> String {
        let mut lines = vec![if self.stopped.is_empty() {
            "No running instances".to_string()
        } else {
            format!("Stopped: {}", self.stopped.join(", "))
        }];
        if !self.purged.is_empty() {
            lines.push(format!("Purged volumes: {}", self.purged.join(", ")));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: &DownArgs, cli: &Cli, config: &Config) -> Result<i32> {
    let manifest_path = cli.manifest_path(config);
    // Purging without a manifest removes every volume under the state dir.
    let manifest = if args.purge && manifest_path.exists() {
        Some(load_manifest(&manifest_path)?)
    } else {
        None
    };

    let orchestrator = open_orchestrator(config).await?;
    let report = orchestrator.down(manifest.as_ref(), args.purge).await?;
    output(&report, cli.json);
    Ok(0)
}
