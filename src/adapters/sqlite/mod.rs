//! SQLite adapters: relational projection, scheduler tasks and the ledger.

pub mod connection;
pub mod ledger_repository;
pub mod migrations;
pub mod mission_repository;
pub mod task_repository;

pub use connection::{create_test_pool, open_file_pool, ConnectionError};
pub use ledger_repository::SqliteLedgerRepository;
pub use migrations::{
    all_embedded_migrations, Migration, MigrationError, MigrationReport, Migrator, SCHEMA_VERSION,
};
pub use mission_repository::SqliteMissionRepository;
pub use task_repository::SqliteTaskRepository;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Phase;

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime).transpose()
}

pub fn parse_phase(s: &str) -> DomainResult<Phase> {
    Phase::parse_str(s).ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {s}")))
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open the database and bring its schema up to date.
pub async fn initialize_database(
    path: &Path,
    max_connections: u32,
    backup_path: Option<PathBuf>,
) -> Result<(SqlitePool, MigrationReport), DatabaseError> {
    let pool = open_file_pool(path, max_connections).await?;
    let mut migrator = Migrator::new(pool.clone());
    if let Some(path) = backup_path {
        migrator = migrator.with_backup(path);
    }
    let report = migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok((pool, report))
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
