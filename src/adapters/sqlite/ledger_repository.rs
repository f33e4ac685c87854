//! SQLite implementation of the append-only LedgerRepository.
//!
//! The `ledger_entries` table carries triggers that abort any UPDATE or
//! DELETE, so entries are write-once even for other writers.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_phase, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LedgerEntry, NewLedgerEntry};
use crate::domain::ports::LedgerRepository;

#[derive(Clone)]
pub struct SqliteLedgerRepository {
    pool: SqlitePool,
}

impl SqliteLedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for SqliteLedgerRepository {
    async fn append(&self, entry: &NewLedgerEntry) -> DomainResult<LedgerEntry> {
        let result = sqlx::query(
            r#"INSERT INTO ledger_entries (task_id, project_id, phase_at_start, phase_at_end,
               result_summary, cost_delta, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.task_id.to_string())
        .bind(entry.project_id.to_string())
        .bind(entry.phase_at_start.map(|p| p.as_str()))
        .bind(entry.phase_at_end.map(|p| p.as_str()))
        .bind(&entry.result_summary)
        .bind(entry.cost_delta)
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(LedgerEntry {
            seq: result.last_insert_rowid(),
            task_id: entry.task_id,
            project_id: entry.project_id,
            phase_at_start: entry.phase_at_start,
            phase_at_end: entry.phase_at_end,
            result_summary: entry.result_summary.clone(),
            cost_delta: entry.cost_delta,
            recorded_at: entry.recorded_at,
        })
    }

    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> =
            sqlx::query_as("SELECT * FROM ledger_entries WHERE project_id = ? ORDER BY seq")
                .bind(project_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_task(&self, task_id: Uuid) -> DomainResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> =
            sqlx::query_as("SELECT * FROM ledger_entries WHERE task_id = ? ORDER BY seq")
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_recent(&self, limit: i64) -> DomainResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> =
            sqlx::query_as("SELECT * FROM ledger_entries ORDER BY seq DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    seq: i64,
    task_id: String,
    project_id: String,
    phase_at_start: Option<String>,
    phase_at_end: Option<String>,
    result_summary: String,
    cost_delta: f64,
    recorded_at: String,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DomainError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            seq: row.seq,
            task_id: parse_uuid(&row.task_id)?,
            project_id: parse_uuid(&row.project_id)?,
            phase_at_start: row.phase_at_start.as_deref().map(parse_phase).transpose()?,
            phase_at_end: row.phase_at_end.as_deref().map(parse_phase).transpose()?,
            result_summary: row.result_summary,
            cost_delta: row.cost_delta,
            recorded_at: parse_datetime(&row.recorded_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::Phase;
    use chrono::Utc;

    fn entry(project_id: Uuid, summary: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            task_id: Uuid::new_v4(),
            project_id,
            phase_at_start: Some(Phase::Testing),
            phase_at_end: Some(Phase::Coding),
            result_summary: summary.to_string(),
            cost_delta: 0.25,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteLedgerRepository::new(pool);
        let project_id = Uuid::new_v4();

        let a = repo.append(&entry(project_id, "first")).await.unwrap();
        let b = repo.append(&entry(project_id, "second")).await.unwrap();
        assert!(b.seq > a.seq);

        let entries = repo.list_for_project(project_id).await.unwrap();
        let summaries: Vec<_> = entries.iter().map(|e| e.result_summary.as_str()).collect();
        assert_eq!(summaries, ["first", "second"]);
        assert_eq!(entries[0].phase_at_start, Some(Phase::Testing));
    }

    #[tokio::test]
    async fn test_entries_cannot_be_mutated() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteLedgerRepository::new(pool.clone());
        let appended = repo.append(&entry(Uuid::new_v4(), "immutable")).await.unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET result_summary = 'edited' WHERE seq = ?")
            .bind(appended.seq)
            .execute(&pool)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_entries WHERE seq = ?")
            .bind(appended.seq)
            .execute(&pool)
            .await;
        assert!(delete.is_err());

        let entries = repo.list_for_task(appended.task_id).await.unwrap();
        assert_eq!(entries[0].result_summary, "immutable");
    }
}
