//! Dual-write persistence for project manifests.
//!
//! The legacy document store is authoritative: every write lands there first
//! and its compare-and-set decides whether a save succeeded. The relational
//! projection is written afterwards on a best-effort basis.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ProjectManifest, ProjectionCounts};
use crate::domain::ports::{DocumentStore, MissionRepository};
use crate::services::legacy_mapping;

/// Outcome of importing every legacy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub imported: usize,
    pub failed: Vec<BackfillFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub project_id: Uuid,
    pub error: String,
}

pub struct PersistenceLayer {
    documents: Arc<dyn DocumentStore>,
    missions: Option<Arc<dyn MissionRepository>>,
    dual_write: bool,
}

impl PersistenceLayer {
    /// Documents only; no relational projection is written.
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            documents,
            missions: None,
            dual_write: false,
        }
    }

    /// Documents plus the relational projection (dual-write).
    pub fn with_projection(mut self, missions: Arc<dyn MissionRepository>) -> Self {
        self.missions = Some(missions);
        self.dual_write = true;
        self
    }

    /// Keep the projection for import and validation but stop writing it on save.
    pub fn with_dual_write(mut self, enabled: bool) -> Self {
        self.dual_write = enabled && self.missions.is_some();
        self
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn missions(&self) -> Option<&Arc<dyn MissionRepository>> {
        self.missions.as_ref()
    }

    /// Store a brand new manifest. Fails if the project already exists.
    #[instrument(skip(self, manifest), fields(project_id = %manifest.project_id()))]
    pub async fn create(&self, manifest: &ProjectManifest) -> DomainResult<()> {
        let id = manifest.project_id();
        let document = manifest.to_document()?;
        self.documents
            .put(id, &document, None)
            .await
            .map_err(|e| match e {
                DomainError::ConcurrencyConflict { .. } => DomainError::ProjectAlreadyExists(id),
                other => other,
            })?;
        self.project(manifest).await;
        info!("Project created");
        Ok(())
    }

    /// Persist `manifest`, bumping its revision.
    ///
    /// The document write is compare-and-set on the revision the manifest was
    /// loaded with; a concurrent writer yields `ConcurrencyConflict` and
    /// `manifest` is left as it was. Relational failures only log.
    #[instrument(skip(self, manifest), fields(project_id = %manifest.project_id()))]
    pub async fn save(&self, manifest: &mut ProjectManifest) -> DomainResult<()> {
        let id = manifest.project_id();
        let expected = match self.documents.get(id).await? {
            Some(_) => Some(manifest.revision()),
            None => None,
        };

        let mut next = manifest.clone();
        next.bump_revision();
        let document = next.to_document()?;
        self.documents.put(id, &document, expected).await?;
        *manifest = next;

        self.project(manifest).await;
        debug!(revision = manifest.revision(), phase = %manifest.phase(), "Manifest saved");
        Ok(())
    }

    /// Most recently saved manifest for `project_id`.
    ///
    /// Reads the document store; projects known only to the relational store
    /// (imported without a document) are rebuilt from their rows.
    pub async fn load(&self, project_id: Uuid) -> DomainResult<ProjectManifest> {
        if let Some(document) = self.documents.get(project_id).await? {
            return ProjectManifest::from_document(&document);
        }
        if let Some(missions) = &self.missions {
            if let Some(record) = missions.find_by_external_id(project_id).await? {
                return legacy_mapping::to_manifest(&record);
            }
        }
        Err(DomainError::ProjectNotFound(project_id))
    }

    /// Import one legacy document into the relational store.
    ///
    /// Keyed by the document's `project_id`: an existing mission is updated in
    /// place, otherwise one is inserted. Importing the same document again
    /// leaves the store unchanged. Returns the internal mission id.
    #[instrument(skip(self, document))]
    pub async fn import_legacy(&self, document: &Value) -> DomainResult<Uuid> {
        let missions = self.require_projection()?;
        let manifest = ProjectManifest::from_document(document)?;
        let record = legacy_mapping::flatten(&manifest, Uuid::new_v4())?;
        let mission_id = missions.upsert(&record).await?;
        debug!(project_id = %manifest.project_id(), %mission_id, "Legacy document imported");
        Ok(mission_id)
    }

    /// Import every document in the legacy store.
    ///
    /// Failures are collected per project; one bad document does not stop the
    /// rest.
    pub async fn import_all(&self) -> DomainResult<BackfillReport> {
        self.require_projection()?;
        let mut report = BackfillReport::default();
        for project_id in self.documents.list_ids().await? {
            let outcome = match self.documents.get(project_id).await? {
                Some(document) => self.import_legacy(&document).await.map(|_| ()),
                None => Err(DomainError::ProjectNotFound(project_id)),
            };
            match outcome {
                Ok(()) => report.imported += 1,
                Err(e) => {
                    warn!(%project_id, error = %e, "Backfill skipped document");
                    report.failed.push(BackfillFailure {
                        project_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(imported = report.imported, failed = report.failed.len(), "Backfill finished");
        Ok(report)
    }

    /// Every project id, from both stores.
    pub async fn list_project_ids(&self) -> DomainResult<Vec<Uuid>> {
        let mut ids = self.documents.list_ids().await?;
        if let Some(missions) = &self.missions {
            ids.extend(missions.list_external_ids().await?);
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Write all manifests as one JSON array to `path`.
    pub async fn export(&self, path: &Path) -> DomainResult<usize> {
        let mut documents = Vec::new();
        for id in self.list_project_ids().await? {
            documents.push(self.load(id).await?.to_document()?);
        }
        let count = documents.len();
        let data = serde_json::to_vec_pretty(&Value::Array(documents))?;
        tokio::fs::write(path, data).await?;
        info!(count, path = %path.display(), "Manifests exported");
        Ok(count)
    }

    /// Row counts of the relational projection.
    pub async fn projection_counts(&self) -> DomainResult<ProjectionCounts> {
        self.require_projection()?.counts().await
    }

    fn require_projection(&self) -> DomainResult<&Arc<dyn MissionRepository>> {
        self.missions.as_ref().ok_or_else(|| {
            DomainError::ValidationFailed("relational projection is not configured".to_string())
        })
    }

    async fn project(&self, manifest: &ProjectManifest) {
        let Some(missions) = self.missions.as_ref().filter(|_| self.dual_write) else {
            return;
        };
        let result = match legacy_mapping::flatten(manifest, Uuid::new_v4()) {
            Ok(record) => missions.upsert(&record).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                project_id = %manifest.project_id(),
                error = %e,
                "Relational write failed; document store remains authoritative"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::documents::InMemoryDocumentStore;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteMissionRepository};
    use crate::domain::models::{Budget, Phase};

    async fn dual_write_layer() -> PersistenceLayer {
        let pool = create_migrated_test_pool().await.unwrap();
        PersistenceLayer::new(Arc::new(InMemoryDocumentStore::new()))
            .with_projection(Arc::new(SqliteMissionRepository::new(pool)))
    }

    #[tokio::test]
    async fn test_save_then_load_returns_latest() {
        let layer = dual_write_layer().await;
        let mut manifest = ProjectManifest::new(Uuid::new_v4(), "alice", Budget::new(10.0));
        layer.create(&manifest).await.unwrap();

        manifest.transition_to(Phase::Coding).unwrap();
        layer.save(&mut manifest).await.unwrap();
        assert_eq!(manifest.revision(), 1);

        let loaded = layer.load(manifest.project_id()).await.unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.phase(), Phase::Coding);
    }

    #[tokio::test]
    async fn test_stale_save_is_rejected() {
        let layer = dual_write_layer().await;
        let manifest = ProjectManifest::new(Uuid::new_v4(), "alice", Budget::new(10.0));
        layer.create(&manifest).await.unwrap();

        let mut first = manifest.clone();
        let mut second = manifest.clone();
        layer.save(&mut first).await.unwrap();

        let err = layer.save(&mut second).await.unwrap_err();
        assert!(matches!(err, DomainError::ConcurrencyConflict { .. }));
        assert_eq!(second.revision(), 0);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let layer = dual_write_layer().await;
        let manifest = ProjectManifest::new(Uuid::new_v4(), "alice", Budget::new(10.0));
        layer.create(&manifest).await.unwrap();
        assert!(matches!(
            layer.create(&manifest).await,
            Err(DomainError::ProjectAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_load_falls_back_to_projection() {
        let layer = dual_write_layer().await;
        let manifest = ProjectManifest::new(Uuid::new_v4(), "bob", Budget::new(5.0));
        layer.import_legacy(&manifest.to_document().unwrap()).await.unwrap();

        let loaded = layer.load(manifest.project_id()).await.unwrap();
        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn test_load_unknown_project() {
        let layer = dual_write_layer().await;
        let id = Uuid::new_v4();
        assert!(matches!(layer.load(id).await, Err(DomainError::ProjectNotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_import_requires_projection() {
        let layer = PersistenceLayer::new(Arc::new(InMemoryDocumentStore::new()));
        let manifest = ProjectManifest::new(Uuid::new_v4(), "bob", Budget::new(5.0));
        assert!(layer
            .import_legacy(&manifest.to_document().unwrap())
            .await
            .is_err());
    }
}
