//! Table and color helpers for human-readable output.
//!
//! `console` disables styling when stdout is not a terminal or `NO_COLOR` is set.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::domain::models::{Phase, TaskStatus};
use crate::services::ConsistencyStatus;

/// Borderless list table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Table rendered under a count line, or a placeholder when empty.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{} {noun}:\n{table}", style(total).bold())
}

pub fn phase(phase: Phase) -> StyledObject<&'static str> {
    let s = phase.as_str();
    match phase {
        Phase::Planning => style(s).blue(),
        Phase::Coding | Phase::Testing => style(s).yellow(),
        Phase::AwaitingQaApproval => style(s).magenta().bold(),
        Phase::Deployment => style(s).cyan(),
        Phase::Production | Phase::Maintenance => style(s).green(),
    }
}

pub fn task_status(status: TaskStatus) -> StyledObject<&'static str> {
    let s = status.as_str();
    match status {
        TaskStatus::Queued => style(s).blue(),
        TaskStatus::Running => style(s).yellow(),
        TaskStatus::Completed => style(s).green().bold(),
        TaskStatus::Failed => style(s).red().bold(),
    }
}

pub fn consistency(status: ConsistencyStatus) -> StyledObject<&'static str> {
    let s = status.as_str();
    match status {
        ConsistencyStatus::Consistent => style(s).green(),
        ConsistencyStatus::ConsistentWithWarnings => style(s).yellow(),
        ConsistencyStatus::Mismatched => style(s).red().bold(),
    }
}

/// `$1.2500 / $10.0000 (12.5%)`
pub fn budget_line(current: f64, max: f64) -> String {
    let pct = if max > 0.0 { current / max * 100.0 } else { 100.0 };
    format!("${current:.4} / ${max:.4} ({pct:.1}%)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_line() {
        assert_eq!(budget_line(1.25, 10.0), "$1.2500 / $10.0000 (12.5%)");
        assert_eq!(budget_line(0.0, 0.0), "$0.0000 / $0.0000 (100.0%)");
    }

    #[test]
    fn test_render_empty_list() {
        let table = list_table(&["id"]);
        assert_eq!(render_list("project", &table, 0), "No projects found.");
    }
}
