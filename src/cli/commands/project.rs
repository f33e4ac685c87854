//! Project commands: advance, approve-qa, reject-qa, status, budget.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::cli::display;
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{Phase, ProjectManifest, SubState, TaskAction, TaskStatus};
use crate::infrastructure::setup::App;
use crate::services::{GateObservation, StepOutcome, StepReport};

#[derive(Debug, Serialize)]
pub struct StepOutput {
    pub task_id: Uuid,
    pub task_status: TaskStatus,
    pub report: StepReport,
    /// Async gates evaluated after the commit.
    pub async_gates: Vec<GateObservation>,
}

impl CommandOutput for StepOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let headline = match &r.outcome {
            StepOutcome::Advanced { from, to } => {
                format!("{} -> {}", display::phase(*from), display::phase(*to))
            }
            StepOutcome::Progressed { phase, sub_state } => match sub_state {
                Some(s) => format!("{} ({s})", display::phase(*phase)),
                None => format!("{} (no phase change)", display::phase(*phase)),
            },
            StepOutcome::Repaired {
                from,
                to,
                repair_cycles,
                reason,
            } => format!(
                "{} -> {} {} cycle {repair_cycles}: {}",
                display::phase(*from),
                display::phase(*to),
                style("repair").yellow().bold(),
                truncate(reason, 120)
            ),
            StepOutcome::Observed { phase } => format!("{}", display::phase(*phase)),
        };

        let mut lines = vec![
            format!("Task {} {}", self.task_id, display::task_status(self.task_status)),
            format!("  {headline}"),
        ];
        if !r.artifacts_added.is_empty() {
            lines.push(format!("  artifacts: {}", r.artifacts_added.join(", ")));
        }
        if r.cost > 0.0 {
            lines.push(format!("  cost: ${:.4}", r.cost));
        }
        for gate in &r.blocking_gates {
            lines.push(format!("  gate {}: {}", gate.gate_id, style("passed").green()));
        }
        for observed in &self.async_gates {
            let verdict = if observed.outcome.passed {
                style("passed").green()
            } else {
                style("failed").yellow()
            };
            lines.push(format!("  async gate {}: {verdict}", observed.outcome.gate_id));
        }
        if r.budget_alert {
            lines.push(format!("  {}", style("budget alert threshold crossed").yellow().bold()));
        }
        lines.join("\n")
    }
}

async fn step(app: &App, project_id: Uuid, action: TaskAction, json_mode: bool) -> Result<()> {
    let started = Utc::now();
    let outcome = app.engine.run_now(project_id, action).await;
    app.engine.settle().await;

    let outcome = outcome?;
    let task_id = outcome.task.id;
    let report = outcome
        .result
        .with_context(|| format!("Task {task_id} failed"))?;
    let async_gates = app
        .engine
        .orchestrator()
        .observer()
        .recent()
        .into_iter()
        .filter(|o| o.project_id == project_id && o.observed_at >= started)
        .collect();

    output(
        &StepOutput {
            task_id,
            task_status: outcome.task.status,
            report,
            async_gates,
        },
        json_mode,
    );
    Ok(())
}

pub async fn advance(app: &App, project_id: Uuid, json_mode: bool) -> Result<()> {
    step(app, project_id, TaskAction::Advance, json_mode).await
}

pub async fn approve_qa(app: &App, project_id: Uuid, json_mode: bool) -> Result<()> {
    step(app, project_id, TaskAction::ApproveQa, json_mode).await
}

pub async fn reject_qa(app: &App, project_id: Uuid, reason: Option<String>, json_mode: bool) -> Result<()> {
    step(app, project_id, TaskAction::RejectQa { reason }, json_mode).await
}

/// Detailed view of one manifest.
#[derive(Debug, Serialize)]
pub struct ProjectView {
    pub project_id: Uuid,
    pub owner: String,
    pub phase: Phase,
    pub sub_state: Option<SubState>,
    pub revision: u64,
    pub current_cost: f64,
    pub max_cost: f64,
    pub alert_threshold: f64,
    pub repair_cycles: u32,
    pub artifacts: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProjectManifest> for ProjectView {
    fn from(m: &ProjectManifest) -> Self {
        Self {
            project_id: m.project_id(),
            owner: m.metadata().owner.clone(),
            phase: m.phase(),
            sub_state: m.sub_state(),
            revision: m.revision(),
            current_cost: m.budget().current_cost,
            max_cost: m.budget().max_cost,
            alert_threshold: m.budget().alert_threshold,
            repair_cycles: m.trajectory().repair_cycles,
            artifacts: m.artifacts().clone(),
            updated_at: m.metadata().updated_at,
        }
    }
}

impl CommandOutput for ProjectView {
    fn to_human(&self) -> String {
        let phase = match self.sub_state {
            Some(s) => format!("{} / {s}", display::phase(self.phase)),
            None => display::phase(self.phase).to_string(),
        };
        let mut lines = vec![
            format!("Project {}", style(self.project_id).bold()),
            format!("  owner:    {}", self.owner),
            format!("  phase:    {phase}"),
            format!("  budget:   {}", display::budget_line(self.current_cost, self.max_cost)),
            format!("  repairs:  {}", self.repair_cycles),
            format!("  revision: {}", self.revision),
            format!("  updated:  {}", self.updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ];
        if !self.artifacts.is_empty() {
            lines.push("  artifacts:".to_string());
            for (name, location) in &self.artifacts {
                lines.push(format!("    {name}: {location}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectList {
    pub projects: Vec<ProjectView>,
}

impl CommandOutput for ProjectList {
    fn to_human(&self) -> String {
        let mut table = display::list_table(&["id", "owner", "phase", "budget", "updated"]);
        for p in &self.projects {
            table.add_row(vec![
                p.project_id.to_string(),
                truncate(&p.owner, 20),
                display::phase(p.phase).to_string(),
                display::budget_line(p.current_cost, p.max_cost),
                p.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]);
        }
        display::render_list("project", &table, self.projects.len())
    }
}

/// With a project id the status query is recorded as an audit task; without one all
/// projects are listed.
pub async fn status(app: &App, project_id: Option<Uuid>, json_mode: bool) -> Result<()> {
    match project_id {
        Some(id) => {
            let outcome = app.engine.run_now(id, TaskAction::Status).await?;
            outcome.result.context("Status query failed")?;
            let manifest = app.engine.load_project(id).await?;
            output(&ProjectView::from(&manifest), json_mode);
        }
        None => {
            let persistence = app.engine.persistence();
            let mut projects = Vec::new();
            for id in persistence.list_project_ids().await? {
                let manifest = persistence.load(id).await?;
                projects.push(ProjectView::from(&manifest));
            }
            projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            output(&ProjectList { projects }, json_mode);
        }
    }
    Ok(())
}

pub async fn budget(app: &App, project_id: Uuid, max_cost: f64, json_mode: bool) -> Result<()> {
    let manifest = app
        .engine
        .raise_budget(project_id, max_cost)
        .await
        .context("Failed to raise budget")?;
    output(&ProjectView::from(&manifest), json_mode);
    Ok(())
}
