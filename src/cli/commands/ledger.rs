//! Audit views: the task ledger and scheduler tasks.

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::cli::display;
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{LedgerEntry, Task};
use crate::domain::ports::TaskFilter;
use crate::infrastructure::setup::App;
use crate::services::LedgerSummary;

#[derive(Debug, Serialize)]
pub struct LedgerOutput {
    pub project_id: Uuid,
    pub summary: LedgerSummary,
    pub entries: Vec<LedgerEntry>,
}

impl CommandOutput for LedgerOutput {
    fn to_human(&self) -> String {
        let mut table = display::list_table(&["seq", "recorded", "start", "end", "cost", "result"]);
        for e in &self.entries {
            table.add_row(vec![
                e.seq.to_string(),
                e.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.phase_at_start.map_or_else(|| "-".to_string(), |p| p.to_string()),
                e.phase_at_end.map_or_else(|| "-".to_string(), |p| p.to_string()),
                format!("{:.4}", e.cost_delta),
                truncate(&e.result_summary, 80),
            ]);
        }
        format!(
            "{}\nTotal cost ${:.4} over {} entries, {} phase transition(s)",
            display::render_list("ledger entry", &table, self.entries.len()),
            self.summary.total_cost,
            self.summary.entries,
            self.summary.transitions
        )
    }
}

pub async fn history(app: &App, project_id: Uuid, json_mode: bool) -> Result<()> {
    let ledger = app.engine.ledger();
    let entries = ledger.history(project_id).await?;
    let summary = ledger.summary(project_id).await?;
    output(
        &LedgerOutput {
            project_id,
            summary,
            entries,
        },
        json_mode,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}

impl CommandOutput for TaskList {
    fn to_human(&self) -> String {
        let mut table = display::list_table(&["id", "project", "action", "status", "enqueued", "error"]);
        for t in &self.tasks {
            table.add_row(vec![
                t.id.to_string(),
                t.project_id.to_string(),
                t.action.to_string(),
                display::task_status(t.status).to_string(),
                t.enqueued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                t.error.as_deref().map_or_else(String::new, |e| truncate(e, 60)),
            ]);
        }
        display::render_list("task", &table, self.tasks.len())
    }
}

pub async fn tasks(
    app: &App,
    project_id: Option<Uuid>,
    include_archived: bool,
    limit: i64,
    json_mode: bool,
) -> Result<()> {
    let tasks = app
        .engine
        .scheduler()
        .list(TaskFilter {
            project_id,
            include_archived,
            limit: Some(limit),
            ..Default::default()
        })
        .await?;
    output(&TaskList { tasks }, json_mode);
    Ok(())
}
