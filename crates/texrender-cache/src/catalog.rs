//! What the host application knows about referencing files.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Existence and dependency oracle used by garbage collection.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn exists(&self, file: &str) -> bool;

    /// Current dependency list of `file`, or `None` when unknown. Unknown
    /// files keep their entries.
    async fn dependencies(&self, file: &str) -> Option<Vec<String>>;
}

/// Catalog held in memory, filled by the caller.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    files: RwLock<HashMap<String, Option<Vec<String>>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a file with known dependencies.
    pub fn insert(&self, file: impl Into<String>, dependencies: Vec<String>) {
        self.files.write().insert(file.into(), Some(dependencies));
    }

    /// Add a file whose dependencies are unknown.
    pub fn insert_unknown(&self, file: impl Into<String>) {
        self.files.write().insert(file.into(), None);
    }

    pub fn remove(&self, file: &str) {
        self.files.write().remove(file);
    }
}

#[async_trait]
impl SourceCatalog for MemoryCatalog {
    async fn exists(&self, file: &str) -> bool {
        self.files.read().contains_key(file)
    }

    async fn dependencies(&self, file: &str) -> Option<Vec<String>> {
        self.files.read().get(file).cloned().flatten()
    }
}

/// Referencing files are paths on the local filesystem, relative to `base`.
/// Dependencies are never known, so cleanup keeps every entry of a file
/// that still exists.
#[derive(Debug, Clone, Default)]
pub struct FsCatalog {
    base: PathBuf,
}

impl FsCatalog {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl SourceCatalog for FsCatalog {
    async fn exists(&self, file: &str) -> bool {
        tokio::fs::try_exists(self.base.join(file))
            .await
            .unwrap_or(false)
    }

    async fn dependencies(&self, _file: &str) -> Option<Vec<String>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_catalog() {
        let catalog = MemoryCatalog::new();
        catalog.insert("a.md", vec!["p.sty".into()]);
        catalog.insert_unknown("b.md");

        assert!(catalog.exists("a.md").await);
        assert_eq!(catalog.dependencies("a.md").await, Some(vec!["p.sty".to_string()]));
        assert!(catalog.exists("b.md").await);
        assert_eq!(catalog.dependencies("b.md").await, None);

        catalog.remove("a.md");
        assert!(!catalog.exists("a.md").await);
    }

    #[tokio::test]
    async fn test_fs_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("doc.tex"), b"x").expect("write");
        let catalog = FsCatalog::new(dir.path());
        assert!(catalog.exists("doc.tex").await);
        assert!(!catalog.exists("gone.tex").await);
        assert!(catalog.dependencies("doc.tex").await.is_none());
    }
}
