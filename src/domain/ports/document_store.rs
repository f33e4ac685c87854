//! Legacy document store port.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// Stores one JSON manifest document per project.
///
/// This is the durable source of truth while the relational projection is
/// being validated. Writes are compare-and-set on `metadata.revision`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, project_id: Uuid) -> DomainResult<Option<Value>>;

    /// Write `document` for `project_id`.
    ///
    /// `expected_revision` is the revision the caller last read: `None` means
    /// the document must not exist yet. A mismatch fails with
    /// `ConcurrencyConflict` and leaves the stored document untouched.
    async fn put(
        &self,
        project_id: Uuid,
        document: &Value,
        expected_revision: Option<u64>,
    ) -> DomainResult<()>;

    /// Ids of every stored document, sorted.
    async fn list_ids(&self) -> DomainResult<Vec<Uuid>>;
}

/// Revision recorded in a manifest document, `0` when absent.
pub fn document_revision(document: &Value) -> u64 {
    document
        .pointer("/metadata/revision")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
