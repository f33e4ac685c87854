//! File-backed legacy document store: one `<project_id>.json` per project.

use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{document_revision, DocumentStore};

pub struct JsonFileDocumentStore {
    dir: PathBuf,
    /// Serializes compare-and-set writes within this process.
    write_lock: Mutex<()>,
}

impl JsonFileDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> DomainResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, project_id: Uuid) -> PathBuf {
        self.dir.join(format!("{project_id}.json"))
    }

    async fn read(&self, path: &Path) -> DomainResult<Option<Value>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write via a temp file in the same directory, then rename over the target.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn get(&self, project_id: Uuid) -> DomainResult<Option<Value>> {
        self.read(&self.path_for(project_id)).await
    }

    async fn put(
        &self,
        project_id: Uuid,
        document: &Value,
        expected_revision: Option<u64>,
    ) -> DomainResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(project_id);

        let current = self.read(&path).await?.map(|doc| document_revision(&doc));
        if current != expected_revision {
            return Err(DomainError::ConcurrencyConflict {
                entity: "manifest".to_string(),
                id: project_id.to_string(),
            });
        }

        let data = serde_json::to_vec_pretty(document)?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &data))
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))??;
        Ok(())
    }

    async fn list_ids(&self) -> DomainResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
