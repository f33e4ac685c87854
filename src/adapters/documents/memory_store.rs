//! In-process document store, used by tests and dry runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{document_revision, DocumentStore};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<Uuid, Value>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, project_id: Uuid) -> DomainResult<Option<Value>> {
        Ok(self.documents.read().await.get(&project_id).cloned())
    }

    async fn put(
        &self,
        project_id: Uuid,
        document: &Value,
        expected_revision: Option<u64>,
    ) -> DomainResult<()> {
        let mut documents = self.documents.write().await;
        let current = documents.get(&project_id).map(document_revision);
        if current != expected_revision {
            return Err(DomainError::ConcurrencyConflict {
                entity: "manifest".to_string(),
                id: project_id.to_string(),
            });
        }
        documents.insert(project_id, document.clone());
        Ok(())
    }

    async fn list_ids(&self) -> DomainResult<Vec<Uuid>> {
        Ok(self.documents.read().await.keys().copied().collect())
    }
}
