//! Filesystem artifact store.
//!
//! Bodies live at `<root>/<project_id>/<name>-<timestamp>-<suffix>`; the
//! location handed out is that path relative to the root.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ArtifactRef;
use crate::domain::ports::ArtifactStore;

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &str) -> DomainResult<PathBuf> {
        let relative = Path::new(location);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || location.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "artifact location '{location}' is not a relative store path"
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, project_id: Uuid, name: &str, content: &[u8]) -> DomainResult<ArtifactRef> {
        let suffix = Uuid::new_v4().simple().to_string();
        let location = format!(
            "{project_id}/{}-{}-{}",
            sanitize(name),
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            &suffix[..8]
        );
        let path = self.resolve(&location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        let mut file = options.open(&path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, content).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(ArtifactRef::new(name, location))
    }

    async fn get(&self, location: &str) -> DomainResult<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(location)?).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_put_gets_a_new_location() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let project = Uuid::new_v4();

        let a = store.put(project, "plan", b"v1").await.unwrap();
        let b = store.put(project, "plan", b"v2").await.unwrap();
        assert_ne!(a.location(), b.location());
        assert_eq!(a.name(), "plan");
        assert_eq!(store.get(a.location()).await.unwrap(), b"v1");
        assert_eq!(store.get(b.location()).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_locations_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
