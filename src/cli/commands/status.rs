//! Implementation of the `keel status` command.

use anyhow::Result;

use crate::cli::open_orchestrator;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::Config;
use crate::services::StatusReport;

impl CommandOutput for StatusReport {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut sections = Vec::new();

        sections.push(if self.instances.is_empty() {
            "No running instances".to_string()
        } else {
            format!("Instances:\n{}", formatter.format_instances(&self.instances))
        });
        if !self.tags.is_empty() {
            sections.push(format!("Images:\n{}", formatter.format_tags(&self.tags)));
        }
        if !self.volumes.is_empty() {
            sections.push(format!("Volumes:\n{}", formatter.format_volumes(&self.volumes)));
        }

        sections.join("\n\n")
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<i32> {
    let orchestrator = open_orchestrator(config).await?;
    output(&orchestrator.status().await?, json_mode);
    Ok(0)
}
