//! Append-only audit ledger of dispatched work.
//!
//! The ledger serves audit and observability queries. The orchestrator writes
//! to it but never reads it to make decisions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{LedgerEntry, NewLedgerEntry};
use crate::domain::ports::LedgerRepository;

/// Aggregate view of one project's ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub entries: usize,
    pub total_cost: f64,
    /// Entries whose start and end phase differ.
    pub transitions: usize,
}

#[derive(Clone)]
pub struct TaskLedger {
    repo: Arc<dyn LedgerRepository>,
}

impl TaskLedger {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: NewLedgerEntry) -> DomainResult<LedgerEntry> {
        let stored = self.repo.append(&entry).await?;
        debug!(seq = stored.seq, task_id = %stored.task_id, "Ledger entry appended");
        Ok(stored)
    }

    pub async fn history(&self, project_id: Uuid) -> DomainResult<Vec<LedgerEntry>> {
        self.repo.list_for_project(project_id).await
    }

    pub async fn for_task(&self, task_id: Uuid) -> DomainResult<Vec<LedgerEntry>> {
        self.repo.list_for_task(task_id).await
    }

    pub async fn recent(&self, limit: i64) -> DomainResult<Vec<LedgerEntry>> {
        self.repo.list_recent(limit).await
    }

    pub async fn summary(&self, project_id: Uuid) -> DomainResult<LedgerSummary> {
        let entries = self.history(project_id).await?;
        Ok(LedgerSummary {
            entries: entries.len(),
            total_cost: entries.iter().map(|e| e.cost_delta).sum(),
            transitions: entries
                .iter()
                .filter(|e| e.phase_at_start.is_some() && e.phase_at_start != e.phase_at_end)
                .count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteLedgerRepository};
    use crate::domain::models::Phase;
    use chrono::Utc;

    fn entry(project_id: Uuid, start: Phase, end: Phase, cost: f64) -> NewLedgerEntry {
        NewLedgerEntry {
            task_id: Uuid::new_v4(),
            project_id,
            phase_at_start: Some(start),
            phase_at_end: Some(end),
            result_summary: "ok".to_string(),
            cost_delta: cost,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_summary_aggregates_project_entries() {
        let pool = create_migrated_test_pool().await.unwrap();
        let ledger = TaskLedger::new(Arc::new(SqliteLedgerRepository::new(pool)));
        let project = Uuid::new_v4();

        ledger.record(entry(project, Phase::Planning, Phase::Planning, 0.5)).await.unwrap();
        ledger.record(entry(project, Phase::Planning, Phase::Coding, 1.0)).await.unwrap();
        ledger.record(entry(Uuid::new_v4(), Phase::Coding, Phase::Testing, 9.0)).await.unwrap();

        let summary = ledger.summary(project).await.unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.transitions, 1);
        assert!((summary.total_cost - 1.5).abs() < 1e-9);
    }
}
