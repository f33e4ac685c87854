use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ArtifactRef;

/// Content-addressed storage for artifact bodies.
///
/// Every `put` yields a fresh location; stored bodies are never overwritten.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, project_id: Uuid, name: &str, content: &[u8]) -> DomainResult<ArtifactRef>;

    async fn get(&self, location: &str) -> DomainResult<Vec<u8>>;
}
