//! Implementation of the `sdlc init` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use uuid::Uuid;

use crate::cli::display;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Phase;
use crate::infrastructure::setup::App;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project owner
    #[arg(long, env = "USER", default_value = "unknown")]
    pub owner: String,

    /// Budget ceiling (defaults to budget.default_max_cost)
    #[arg(long)]
    pub max_cost: Option<f64>,

    /// Fraction of the budget that triggers an alert (defaults to budget.alert_threshold)
    #[arg(long)]
    pub alert_threshold: Option<f64>,

    /// Rewrite .sdlc/config.yaml even if it exists
    #[arg(long, short)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub project_id: Uuid,
    pub owner: String,
    pub phase: Phase,
    pub max_cost: f64,
    pub alert_threshold: f64,
    pub schema_version: i64,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        format!(
            "Created project {}\n  owner:  {}\n  phase:  {} (DISCOVERY)\n  budget: {} (alert at {:.0}%)\n  schema: v{}",
            self.project_id,
            self.owner,
            display::phase(self.phase),
            display::budget_line(0.0, self.max_cost),
            self.alert_threshold * 100.0,
            self.schema_version,
        )
    }
}

pub async fn execute(app: &App, args: InitArgs, json_mode: bool) -> Result<()> {
    let max_cost = args.max_cost.unwrap_or(app.config.budget.default_max_cost);
    let threshold = args.alert_threshold.unwrap_or(app.config.budget.alert_threshold);

    let manifest = app
        .engine
        .create_project(&args.owner, max_cost, Some(threshold))
        .await
        .context("Failed to create project")?;

    output(
        &InitOutput {
            project_id: manifest.project_id(),
            owner: args.owner,
            phase: manifest.phase(),
            max_cost: manifest.budget().max_cost,
            alert_threshold: manifest.budget().alert_threshold,
            schema_version: app.migration.to_version,
        },
        json_mode,
    );
    Ok(())
}
