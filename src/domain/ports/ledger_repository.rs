use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{LedgerEntry, NewLedgerEntry};

/// Append-only audit ledger. There is no update or delete.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append(&self, entry: &NewLedgerEntry) -> DomainResult<LedgerEntry>;

    /// Entries of one project in append order.
    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<LedgerEntry>>;

    async fn list_for_task(&self, task_id: Uuid) -> DomainResult<Vec<LedgerEntry>>;

    /// Most recent entries across all projects, newest first.
    async fn list_recent(&self, limit: i64) -> DomainResult<Vec<LedgerEntry>>;
}
