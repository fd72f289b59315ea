//! Artifact storage backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheResult;
use crate::index::INDEX_FILE;

/// Which backend holds the artifacts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Directory,
}

/// Named blobs. Names are artifact names (`<source>-<deps>`).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn put(&self, name: &str, data: &[u8]) -> CacheResult<()>;

    /// `None` when the artifact is absent.
    async fn get(&self, name: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Returns true if something was removed.
    async fn remove(&self, name: &str) -> CacheResult<bool>;

    async fn list(&self) -> CacheResult<Vec<String>>;

    async fn contains(&self, name: &str) -> CacheResult<bool> {
        Ok(self.get(name).await?.is_some())
    }
}

/// Artifacts in a map. Lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, name: &str, data: &[u8]) -> CacheResult<()> {
        self.artifacts.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, name: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.artifacts.read().get(name).cloned())
    }

    async fn remove(&self, name: &str) -> CacheResult<bool> {
        Ok(self.artifacts.write().remove(name).is_some())
    }

    async fn list(&self) -> CacheResult<Vec<String>> {
        let mut names: Vec<String> = self.artifacts.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn contains(&self, name: &str) -> CacheResult<bool> {
        Ok(self.artifacts.read().contains_key(name))
    }
}

/// One file per artifact: `<root>/<name>.<extension>`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    extension: String,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, self.extension))
    }

    fn name_of(&self, file_name: &str) -> Option<String> {
        if file_name == INDEX_FILE {
            return None;
        }
        let stem = file_name.strip_suffix(&self.extension)?.strip_suffix('.')?;
        (!stem.is_empty() && !stem.starts_with('.')).then(|| stem.to_string())
    }
}

#[async_trait]
impl ArtifactStore for DirectoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Directory
    }

    async fn put(&self, name: &str, data: &[u8]) -> CacheResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_of(name);
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "artifact stored");
        Ok(())
    }

    async fn get(&self, name: &str) -> CacheResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_of(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> CacheResult<bool> {
        match tokio::fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> CacheResult<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = self.name_of(&entry.file_name().to_string_lossy()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn contains(&self, name: &str) -> CacheResult<bool> {
        Ok(tokio::fs::try_exists(self.path_of(name)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn ArtifactStore) {
        assert!(store.list().await.expect("list").is_empty());
        store.put("h1-nodeps", b"<svg/>").await.expect("put");
        store.put("h0-abc", b"<svg>0</svg>").await.expect("put");

        assert_eq!(store.get("h1-nodeps").await.expect("get").as_deref(), Some(&b"<svg/>"[..]));
        assert!(store.get("h9-nodeps").await.expect("get").is_none());
        assert!(store.contains("h0-abc").await.expect("contains"));
        assert_eq!(store.list().await.expect("list"), ["h0-abc", "h1-nodeps"]);

        assert!(store.remove("h0-abc").await.expect("remove"));
        assert!(!store.remove("h0-abc").await.expect("remove again"));
        assert_eq!(store.list().await.expect("list"), ["h1-nodeps"]);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.kind(), BackendKind::Memory);
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_directory_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirectoryStore::new(dir.path().join("artifacts"), ".svg");
        assert!(store.list().await.expect("missing root").is_empty());
        exercise(&store).await;
        assert!(dir.path().join("artifacts/h1-nodeps.svg").exists());
    }

    #[tokio::test]
    async fn test_directory_store_ignores_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(INDEX_FILE), b"{}").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"x").expect("write");
        std::fs::write(dir.path().join(".svg"), b"x").expect("write");
        let store = DirectoryStore::new(dir.path(), "svg");
        store.put("h1-nodeps", b"a").await.expect("put");
        assert_eq!(store.list().await.expect("list"), ["h1-nodeps"]);
    }

    #[test]
    fn test_backend_kind_names() {
        assert_eq!(BackendKind::Directory.to_string(), "directory");
        assert_eq!("memory".parse::<BackendKind>().expect("parse"), BackendKind::Memory);
    }
}
