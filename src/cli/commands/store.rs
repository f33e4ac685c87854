//! Persistence commands: import, backfill, validate, migrate, export.

use anyhow::{bail, Context, Result};
use console::style;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::cli::display;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, ProjectionCounts};
use crate::infrastructure::setup::{open_database, App};
use crate::services::{BackfillReport, ConsistencyStatus, ShadowReport};

#[derive(Debug, Serialize)]
pub struct ImportOutput {
    pub imported: Vec<Uuid>,
    pub counts: ProjectionCounts,
}

impl CommandOutput for ImportOutput {
    fn to_human(&self) -> String {
        format!(
            "Imported {} document(s); relational store now holds {} mission(s)",
            self.imported.len(),
            self.counts.missions
        )
    }
}

/// Import one document or an array of documents. Re-importing is a no-op.
pub async fn import(app: &App, path: &Path, json_mode: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))?;
    let documents = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    let persistence = app.engine.persistence();
    let mut imported = Vec::with_capacity(documents.len());
    for (index, document) in documents.iter().enumerate() {
        let id = persistence
            .import_legacy(document)
            .await
            .with_context(|| format!("Document #{index} could not be imported"))?;
        imported.push(id);
    }
    let counts = persistence.projection_counts().await?;
    output(&ImportOutput { imported, counts }, json_mode);
    Ok(())
}

impl CommandOutput for BackfillReport {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Imported {} project(s)", self.imported)];
        for failure in &self.failed {
            lines.push(format!("  {} {}: {}", style("failed").red(), failure.project_id, failure.error));
        }
        lines.join("\n")
    }
}

pub async fn backfill(app: &App, json_mode: bool) -> Result<()> {
    let report = app.engine.persistence().import_all().await?;
    output(&report, json_mode);
    if !report.failed.is_empty() {
        bail!("{} project(s) failed to import", report.failed.len());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ValidationOutput {
    pub reports: Vec<ShadowReport>,
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        let mut table = display::list_table(&["project", "status", "warnings", "mismatches"]);
        for r in &self.reports {
            table.add_row(vec![
                r.project_id.to_string(),
                display::consistency(r.status).to_string(),
                r.warnings().count().to_string(),
                r.mismatches().count().to_string(),
            ]);
        }
        let mut out = display::render_list("project", &table, self.reports.len());
        for r in self.reports.iter().filter(|r| r.status == ConsistencyStatus::Mismatched) {
            out.push_str(&format!("\n\n{}:", r.project_id));
            for diff in r.mismatches() {
                out.push_str(&format!("\n  {}: legacy={} relational={}", diff.field, diff.legacy, diff.relational));
            }
        }
        out
    }
}

/// Shadow-validate one or all projects. Mismatches make the command fail.
pub async fn validate(app: &App, project_id: Option<Uuid>, json_mode: bool) -> Result<()> {
    let reports = match project_id {
        Some(id) => vec![app.shadow.validate(id).await?],
        None => app.shadow.validate_all().await?,
    };
    let mismatched = reports
        .iter()
        .filter(|r| r.status == ConsistencyStatus::Mismatched)
        .count();
    output(&ValidationOutput { reports }, json_mode);
    if mismatched > 0 {
        warn!(mismatched, "Shadow validation found mismatches");
        bail!("{mismatched} project(s) mismatched");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct MigrateOutput {
    pub database: String,
    pub from_version: i64,
    pub to_version: i64,
    pub applied: usize,
    pub backup: Option<PathBuf>,
}

impl CommandOutput for MigrateOutput {
    fn to_human(&self) -> String {
        if self.applied == 0 {
            return format!("{} is up to date (schema v{})", self.database, self.to_version);
        }
        let mut out = format!(
            "Migrated {} from v{} to v{} ({} migration(s))",
            self.database, self.from_version, self.to_version, self.applied
        );
        if let Some(backup) = &self.backup {
            out.push_str(&format!("\nPre-migration backup: {}", backup.display()));
        }
        out
    }
}

pub async fn migrate(config: &Config, json_mode: bool) -> Result<()> {
    let (pool, report) = open_database(config).await?;
    pool.close().await;
    output(
        &MigrateOutput {
            database: config.database.path.clone(),
            from_version: report.from_version,
            to_version: report.to_version,
            applied: report.applied,
            backup: report.backup,
        },
        json_mode,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ExportOutput {
    pub path: PathBuf,
    pub exported: usize,
}

impl CommandOutput for ExportOutput {
    fn to_human(&self) -> String {
        format!("Exported {} manifest(s) to {}", self.exported, self.path.display())
    }
}

pub async fn export(app: &App, path: &Path, json_mode: bool) -> Result<()> {
    let exported = app
        .engine
        .persistence()
        .export(path)
        .await
        .with_context(|| format!("Failed to export to {}", path.display()))?;
    output(
        &ExportOutput {
            path: path.to_path_buf(),
            exported,
        },
        json_mode,
    );
    Ok(())
}
