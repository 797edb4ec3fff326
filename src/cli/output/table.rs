//! Table output formatting for CLI commands
//!
//! Formatted tables for build results, service states and recorded state,
//! using comfy-table.

use std::collections::BTreeMap;
use std::env;

use chrono::{DateTime, Utc};
use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::domain::models::{ServiceState, Volume};
use crate::domain::ports::{InstanceRecord, TagRecord};
use crate::services::{BuildStatus, ImageBuildResult};

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    pub fn format_builds(&self, results: &[ImageBuildResult]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Image", "Status", "Fingerprint", "Time"]));

        for result in results {
            let status = result.status.as_str();
            let detail = match &result.status {
                BuildStatus::Failed(reason) => format!("{status}: {}", truncate_text(reason, 60)),
                BuildStatus::Skipped { parent } => format!("{status} (parent {parent})"),
                _ => status.to_string(),
            };
            table.add_row(vec![
                Cell::new(result.reference.to_string()),
                self.status_cell(detail, build_color(&result.status)),
                Cell::new(result.fingerprint.as_ref().map_or("-", |f| f.short())),
                Cell::new(format!("{}ms", result.duration.as_millis())).set_alignment(CellAlignment::Right),
            ]);
        }

        table.to_string()
    }

    pub fn format_states(&self, states: &BTreeMap<String, ServiceState>, exit_codes: &BTreeMap<String, i32>) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Service", "State", "Exit"]));

        for (service, state) in states {
            table.add_row(vec![
                Cell::new(service),
                self.status_cell(state.as_str().to_string(), state_color(*state)),
                Cell::new(exit_codes.get(service).map_or_else(|| "-".to_string(), ToString::to_string))
                    .set_alignment(CellAlignment::Right),
            ]);
        }

        table.to_string()
    }

    pub fn format_instances(&self, instances: &[InstanceRecord]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Service", "PID", "State", "Started"]));

        for instance in instances {
            table.add_row(vec![
                Cell::new(&instance.service),
                Cell::new(instance.pid.map_or_else(|| "-".to_string(), |p| p.to_string())),
                self.status_cell(instance.state.as_str().to_string(), state_color(instance.state)),
                Cell::new(format_relative_time(&instance.started_at)),
            ]);
        }

        table.to_string()
    }

    pub fn format_tags(&self, tags: &[TagRecord]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Image", "Fingerprint", "Built"]));

        for tag in tags {
            table.add_row(vec![
                Cell::new(tag.reference.to_string()),
                Cell::new(tag.fingerprint.short()),
                Cell::new(format_relative_time(&tag.built_at)),
            ]);
        }

        table.to_string()
    }

    pub fn format_volumes(&self, volumes: &[Volume]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Volume", "Path"]));

        for volume in volumes {
            table.add_row(vec![Cell::new(&volume.name), Cell::new(volume.path.display())]);
        }

        table.to_string()
    }

    fn status_cell(&self, text: String, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    true
}

const fn state_color(state: ServiceState) -> Color {
    match state {
        ServiceState::Running | ServiceState::Healthy => Color::Green,
        ServiceState::Building
        | ServiceState::Built
        | ServiceState::Starting
        | ServiceState::AwaitingHealth
        | ServiceState::Stopping => Color::Yellow,
        ServiceState::Defined => Color::Blue,
        ServiceState::Exited => Color::Grey,
        ServiceState::Failed => Color::Red,
    }
}

const fn build_color(status: &BuildStatus) -> Color {
    match status {
        BuildStatus::Built => Color::Green,
        BuildStatus::Cached | BuildStatus::Reused | BuildStatus::External => Color::Cyan,
        BuildStatus::Failed(_) | BuildStatus::Skipped { .. } => Color::Red,
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn format_relative_time(datetime: &DateTime<Utc>) -> String {
    let secs = (Utc::now() - *datetime).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("exactly ten", 11), "exactly ten");
        assert_eq!(truncate_text("this is a long reason", 10), "this is...");
    }

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(format_relative_time(&now), "0s ago");
        assert_eq!(format_relative_time(&(now - chrono::Duration::minutes(5))), "5m ago");
        assert_eq!(format_relative_time(&(now - chrono::Duration::days(2))), "2d ago");
    }

    #[test]
    fn test_states_table_lists_every_service() {
        let formatter = TableFormatter::with_config(false, Some(80));
        let states = BTreeMap::from([
            ("analysis".to_string(), ServiceState::Exited),
            ("database".to_string(), ServiceState::Running),
        ]);
        let exit_codes = BTreeMap::from([("analysis".to_string(), 0)]);

        let rendered = formatter.format_states(&states, &exit_codes);
        assert!(rendered.contains("analysis"));
        assert!(rendered.contains("exited"));
        assert!(rendered.contains("running"));
    }
}
