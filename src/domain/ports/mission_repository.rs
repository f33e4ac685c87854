//! Relational projection port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{MissionRecord, ProjectionCounts};

#[async_trait]
pub trait MissionRepository: Send + Sync {
    /// Insert or update the mission keyed by `record.mission.external_id`.
    ///
    /// An existing mission keeps its internal id and has its child rows
    /// replaced; the whole upsert runs in one transaction. Returns the
    /// internal mission id.
    async fn upsert(&self, record: &MissionRecord) -> DomainResult<Uuid>;

    async fn find_by_external_id(&self, external_id: Uuid) -> DomainResult<Option<MissionRecord>>;

    async fn list_external_ids(&self) -> DomainResult<Vec<Uuid>>;

    async fn counts(&self) -> DomainResult<ProjectionCounts>;
}
