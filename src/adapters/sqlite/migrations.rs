//! SQLite schema migrations.
//!
//! The schema version is `PRAGMA user_version`. Migrations are forward-only;
//! rolling back means restoring the pre-migration export.

use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
    #[error("Database schema version {stored} is newer than this build supports ({expected})")]
    SchemaAhead { stored: i64, expected: i64 },
    #[error("Failed to write pre-migration export to {path}: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub sql: String,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    pub applied: usize,
    pub backup: Option<PathBuf>,
}

pub struct Migrator {
    pool: SqlitePool,
    backup_path: Option<PathBuf>,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            backup_path: None,
        }
    }

    /// Write a `VACUUM INTO` copy to `path` before migrating a non-empty store.
    pub fn with_backup(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(version)
    }

    pub async fn run_embedded_migrations(
        &self,
        migrations: Vec<Migration>,
    ) -> Result<MigrationReport, MigrationError> {
        let current = self.get_current_version().await?;
        let expected = migrations.iter().map(|m| m.version).max().unwrap_or(0);
        if current > expected {
            return Err(MigrationError::SchemaAhead {
                stored: current,
                expected,
            });
        }

        let pending: Vec<_> = migrations.into_iter().filter(|m| m.version > current).collect();
        let mut report = MigrationReport {
            from_version: current,
            to_version: current,
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        if current > 0 {
            if let Some(path) = &self.backup_path {
                self.export_to(path).await?;
                report.backup = Some(path.clone());
            }
        }

        for migration in &pending {
            self.apply_migration(migration).await?;
            info!(
                version = migration.version,
                description = %migration.description,
                "Applied schema migration"
            );
            report.to_version = migration.version;
            report.applied += 1;
        }

        Ok(report)
    }

    /// Consistent copy of the whole database.
    pub async fn export_to(&self, path: &Path) -> Result<(), MigrationError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "Could not create backup directory");
                }
            }
        }
        sqlx::query("VACUUM INTO ?")
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|source| MigrationError::BackupFailed {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "Wrote pre-migration export");
        Ok(())
    }

    /// Applies the migration and bumps `user_version` in one transaction.
    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        let err = |source| MigrationError::ExecutionError {
            version: migration.version,
            source,
        };
        let mut tx = self.pool.begin().await.map_err(err)?;
        sqlx::raw_sql(&migration.sql).execute(&mut *tx).await.map_err(err)?;
        sqlx::raw_sql(&format!("PRAGMA user_version = {}", migration.version))
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        tx.commit().await.map_err(err)?;
        Ok(())
    }
}

pub fn relational_projection_migration() -> Migration {
    Migration {
        version: 1,
        description: "Relational projection of project manifests".to_string(),
        sql: include_str!("../../../migrations/001_relational_projection.sql").to_string(),
    }
}

pub fn tasks_and_ledger_migration() -> Migration {
    Migration {
        version: 2,
        description: "Scheduler tasks and append-only ledger".to_string(),
        sql: include_str!("../../../migrations/002_tasks_and_ledger.sql").to_string(),
    }
}

pub fn budget_alert_threshold_migration() -> Migration {
    Migration {
        version: 3,
        description: "Promote budget alert threshold to a column".to_string(),
        sql: include_str!("../../../migrations/003_budget_alert_threshold.sql").to_string(),
    }
}

pub fn task_leases_migration() -> Migration {
    Migration {
        version: 4,
        description: "Claim owner and lease of running tasks".to_string(),
        sql: include_str!("../../../migrations/004_task_leases.sql").to_string(),
    }
}

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![
        relational_projection_migration(),
        tasks_and_ledger_migration(),
        budget_alert_threshold_migration(),
        task_leases_migration(),
    ]
}

/// Schema version this build expects.
pub const SCHEMA_VERSION: i64 = 4;
