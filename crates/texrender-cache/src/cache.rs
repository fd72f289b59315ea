//! The result cache.
//!
//! Artifacts are keyed by `<source_hash>-<dependency_hash>`; the index
//! remembers which referencing files used which key. Writes to one source
//! hash are serialized by a per-key async mutex; the index itself sits
//! behind its own mutex and is persisted after every change.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::catalog::SourceCatalog;
use crate::error::{CacheError, CacheResult};
use crate::hash::{artifact_name, dependency_set_hash, is_source_hash, source_of};
use crate::index::{CacheIndex, IndexStore, JsonIndexStore, MemoryIndexStore};
use crate::storage::{ArtifactStore, BackendKind, DirectoryStore, MemoryStore};

/// What `restore` does when no entry references the calling file.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FallbackPolicy {
    /// Miss.
    #[default]
    Strict,
    /// Use the first entry recorded for the source hash.
    FirstEntry,
}

/// Counts from one garbage collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Referencing files that no longer exist.
    pub missing_files: usize,
    /// References whose dependency set changed.
    pub stale_references: usize,
    /// Entries emptied by the two steps above.
    pub entries_removed: usize,
    /// Stored artifacts with no index entry.
    pub orphan_artifacts: usize,
    /// Index entries with no stored artifact.
    pub dangling_entries: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub backend: BackendKind,
    pub sources: usize,
    pub entries: usize,
    pub referencing_files: usize,
    pub artifacts: usize,
}

pub struct ResultCache {
    index: Mutex<CacheIndex>,
    index_store: RwLock<Box<dyn IndexStore>>,
    store: RwLock<Box<dyn ArtifactStore>>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    fallback: FallbackPolicy,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("fallback", &self.fallback)
            .field("locked_keys", &self.key_locks.len())
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Open a cache, loading the index from `index_store`.
    pub async fn open(
        store: Box<dyn ArtifactStore>,
        index_store: Box<dyn IndexStore>,
        fallback: FallbackPolicy,
    ) -> CacheResult<Self> {
        let index = index_store.load().await?;
        info!(
            backend = %store.kind(),
            sources = index.source_count(),
            entries = index.entry_count(),
            %fallback,
            "result cache opened"
        );
        Ok(Self {
            index: Mutex::new(index),
            index_store: RwLock::new(index_store),
            store: RwLock::new(store),
            key_locks: DashMap::new(),
            fallback,
        })
    }

    /// Nothing persisted.
    pub fn in_memory(fallback: FallbackPolicy) -> Self {
        Self {
            index: Mutex::new(CacheIndex::new()),
            index_store: RwLock::new(Box::new(MemoryIndexStore::new())),
            store: RwLock::new(Box::new(MemoryStore::new())),
            key_locks: DashMap::new(),
            fallback,
        }
    }

    /// Artifacts and `index.json` under `root`.
    pub async fn in_directory(
        root: impl AsRef<Path>,
        extension: &str,
        fallback: FallbackPolicy,
    ) -> CacheResult<Self> {
        let root = root.as_ref();
        Self::open(
            Box::new(DirectoryStore::new(root, extension)),
            Box::new(JsonIndexStore::in_root(root)),
            fallback,
        )
        .await
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub async fn backend(&self) -> BackendKind {
        self.store.read().await.kind()
    }

    async fn persist(&self, index: &CacheIndex) -> CacheResult<()> {
        self.index_store.read().await.save(index).await
    }

    fn key_lock(&self, source_hash: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(source_hash.to_string())
            .or_default()
            .clone()
    }

    fn key_busy(&self, source_hash: &str) -> bool {
        self.key_locks
            .get(source_hash)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Store `content` for `(source_hash, dependencies)` and record
    /// `referencing_file` as its user.
    ///
    /// Fails with [`CacheError::IndexConflict`] if the file already
    /// references another dependency set of the same source; nothing is
    /// written in that case.
    pub async fn add_file(
        &self,
        content: &[u8],
        source_hash: &str,
        dependencies: &[String],
        referencing_file: &str,
    ) -> CacheResult<()> {
        check_source_hash(source_hash)?;
        let lock = self.key_lock(source_hash);
        let _guard = lock.lock().await;

        let dependency_hash = dependency_set_hash(dependencies);
        let name = artifact_name(source_hash, &dependency_hash);
        {
            let index = self.index.lock().await;
            if let Err(e) = index.check_conflict(source_hash, &dependency_hash, referencing_file) {
                error!(source_hash, file = referencing_file, error = %e, "cache index conflict");
                return Err(e);
            }
        }

        self.store.read().await.put(&name, content).await?;

        let mut index = self.index.lock().await;
        let created = index.record(source_hash, dependencies, referencing_file);
        self.persist(&index).await?;
        debug!(artifact = %name, file = referencing_file, created, "artifact cached");
        Ok(())
    }

    async fn load_artifact(&self, name: &str) -> CacheResult<Option<Vec<u8>>> {
        let data = self.store.read().await.get(name).await?;
        if data.is_none() {
            warn!(artifact = %name, "indexed artifact missing from storage, treating as miss");
        }
        Ok(data)
    }

    /// Artifact last rendered for `referencing_file` from `source_hash`.
    pub async fn restore(&self, source_hash: &str, referencing_file: &str) -> CacheResult<Option<Vec<u8>>> {
        check_source_hash(source_hash)?;
        let name = {
            let index = self.index.lock().await;
            if let Some(entry) = index.find_referenced_by(source_hash, referencing_file) {
                artifact_name(source_hash, &entry.dependency_hash)
            } else {
                let first = match self.fallback {
                    FallbackPolicy::Strict => None,
                    FallbackPolicy::FirstEntry => index.entries(source_hash).first(),
                };
                let Some(entry) = first else {
                    debug!(source_hash, file = referencing_file, "cache miss");
                    return Ok(None);
                };
                info!(
                    source_hash,
                    file = referencing_file,
                    dependency_hash = %entry.dependency_hash,
                    "provisional hit from first entry"
                );
                artifact_name(source_hash, &entry.dependency_hash)
            }
        };
        self.load_artifact(&name).await
    }

    /// Artifact for exactly `(source_hash, dependencies)`, whoever recorded it.
    pub async fn restore_exact(
        &self,
        source_hash: &str,
        dependencies: &[String],
        referencing_file: &str,
    ) -> CacheResult<Option<Vec<u8>>> {
        check_source_hash(source_hash)?;
        let dependency_hash = dependency_set_hash(dependencies);
        let known = self.index.lock().await.find(source_hash, &dependency_hash).is_some();
        if !known {
            debug!(source_hash, %dependency_hash, file = referencing_file, "cache miss");
            return Ok(None);
        }
        self.load_artifact(&artifact_name(source_hash, &dependency_hash)).await
    }

    /// Drop `referencing_file` from every entry of `source_hash`, deleting
    /// artifacts nobody references any more. Returns how many went.
    pub async fn release(&self, source_hash: &str, referencing_file: &str) -> CacheResult<usize> {
        check_source_hash(source_hash)?;
        let lock = self.key_lock(source_hash);
        let _guard = lock.lock().await;

        let dropped = {
            let mut index = self.index.lock().await;
            if index.find_referenced_by(source_hash, referencing_file).is_none() {
                return Ok(0);
            }
            let dropped = index.remove_reference(source_hash, referencing_file);
            self.persist(&index).await?;
            dropped
        };
        let store = self.store.read().await;
        for name in &dropped {
            store.remove(name).await?;
        }
        debug!(source_hash, file = referencing_file, removed = dropped.len(), "reference released");
        Ok(dropped.len())
    }

    /// Forget everything. Returns how many artifacts were deleted.
    pub async fn remove_all_cached(&self) -> CacheResult<usize> {
        let mut index = self.index.lock().await;
        index.clear();
        self.persist(&index).await?;
        let store = self.store.read().await;
        let names = store.list().await?;
        for name in &names {
            store.remove(name).await?;
        }
        info!(artifacts = names.len(), "cache cleared");
        Ok(names.len())
    }

    /// Garbage collection.
    ///
    /// 1. Referencing files the catalog no longer has are dropped everywhere.
    /// 2. Files whose dependency set changed are dropped from entries
    ///    recorded under the old set.
    /// 3. Stored artifacts and index entries are reconciled both ways.
    ///
    /// Entries left with no referencing file are removed with their artifact.
    pub async fn clean_up(&self, catalog: &dyn SourceCatalog) -> CacheResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let mut index = self.index.lock().await;
        let mut doomed = Vec::new();

        for file in index.referencing_files() {
            if !catalog.exists(&file).await {
                report.missing_files += 1;
                doomed.extend(index.forget_file(&file));
                continue;
            }
            let Some(dependencies) = catalog.dependencies(&file).await else {
                continue;
            };
            let current = dependency_set_hash(&dependencies);
            for source in index.sources_referenced_by(&file) {
                let stale = index
                    .find_referenced_by(&source, &file)
                    .is_some_and(|entry| entry.dependency_hash != current);
                if stale {
                    report.stale_references += 1;
                    doomed.extend(index.remove_reference_where(&source, &file, |entry| {
                        entry.dependency_hash != current
                    }));
                }
            }
        }
        report.entries_removed = doomed.len();

        let store = self.store.read().await;
        for name in &doomed {
            store.remove(name).await?;
        }

        let indexed = index.artifact_names();
        let stored: BTreeSet<String> = store.list().await?.into_iter().collect();
        for name in stored.difference(&indexed) {
            if self.key_busy(source_of(name)) {
                debug!(artifact = %name, "write in flight, not an orphan yet");
                continue;
            }
            store.remove(name).await?;
            report.orphan_artifacts += 1;
        }
        for name in indexed.difference(&stored) {
            if index.remove_artifact(name) {
                warn!(artifact = %name, "dropping index entry with no stored artifact");
                report.dangling_entries += 1;
            }
        }
        drop(store);

        if !report.is_clean() {
            self.persist(&index).await?;
        }
        self.key_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        info!(
            missing_files = report.missing_files,
            stale_references = report.stale_references,
            entries_removed = report.entries_removed,
            orphan_artifacts = report.orphan_artifacts,
            dangling_entries = report.dangling_entries,
            "cache cleanup"
        );
        Ok(report)
    }

    /// Move every artifact to `new_store`, verify each one, persist the
    /// index to `new_index_store`, then collect garbage.
    ///
    /// The index store must belong with the artifact store: a
    /// [`DirectoryStore`] pairs with [`JsonIndexStore::in_root`] on the same
    /// root, or the artifacts are orphans the next time it is opened.
    pub async fn switch_backend(
        &self,
        new_store: Box<dyn ArtifactStore>,
        new_index_store: Box<dyn IndexStore>,
        catalog: &dyn SourceCatalog,
    ) -> CacheResult<CleanupReport> {
        {
            let mut store = self.store.write().await;
            let names = store.list().await?;
            for name in &names {
                let Some(data) = store.get(name).await? else {
                    continue;
                };
                new_store.put(name, &data).await?;
                if new_store.get(name).await?.as_deref() != Some(data.as_slice()) {
                    return Err(CacheError::MigrationMismatch(name.clone()));
                }
            }
            for name in &names {
                store.remove(name).await?;
            }
            info!(
                from = %store.kind(),
                to = %new_store.kind(),
                artifacts = names.len(),
                "cache backend switched"
            );
            *store = new_store;
        }
        {
            let index = self.index.lock().await;
            new_index_store.save(&index).await?;
            *self.index_store.write().await = new_index_store;
        }
        self.clean_up(catalog).await
    }

    /// [`switch_backend`](Self::switch_backend) to artifacts and `index.json`
    /// under `root`.
    pub async fn switch_to_directory(
        &self,
        root: impl AsRef<Path>,
        extension: &str,
        catalog: &dyn SourceCatalog,
    ) -> CacheResult<CleanupReport> {
        let root = root.as_ref();
        self.switch_backend(
            Box::new(DirectoryStore::new(root, extension)),
            Box::new(JsonIndexStore::in_root(root)),
            catalog,
        )
        .await
    }

    /// [`switch_backend`](Self::switch_backend) to memory.
    pub async fn switch_to_memory(&self, catalog: &dyn SourceCatalog) -> CacheResult<CleanupReport> {
        self.switch_backend(
            Box::new(MemoryStore::new()),
            Box::new(MemoryIndexStore::new()),
            catalog,
        )
        .await
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let index = self.index.lock().await;
        let store = self.store.read().await;
        Ok(CacheStats {
            backend: store.kind(),
            sources: index.source_count(),
            entries: index.entry_count(),
            referencing_files: index.referencing_files().len(),
            artifacts: store.list().await?.len(),
        })
    }
}

fn check_source_hash(source_hash: &str) -> CacheResult<()> {
    if is_source_hash(source_hash) {
        Ok(())
    } else {
        Err(CacheError::InvalidSourceHash(source_hash.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::hash::content_hash;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_then_restore() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        cache
            .add_file(b"X", "a1", &deps(&["p.sty"]), "a.md")
            .await
            .expect("add");

        assert_eq!(cache.restore("a1", "a.md").await.expect("restore"), Some(b"X".to_vec()));
        assert_eq!(cache.restore("a1", "other.md").await.expect("restore"), None);
        assert_eq!(
            cache
                .restore_exact("a1", &deps(&["p.sty"]), "other.md")
                .await
                .expect("exact"),
            Some(b"X".to_vec())
        );
        assert_eq!(
            cache.restore_exact("a1", &[], "a.md").await.expect("exact"),
            None
        );
    }

    #[tokio::test]
    async fn test_first_entry_fallback() {
        let cache = ResultCache::in_memory(FallbackPolicy::FirstEntry);
        cache.add_file(b"X", "a1", &[], "a.md").await.expect("add");
        assert_eq!(cache.restore("a1", "other.md").await.expect("restore"), Some(b"X".to_vec()));
        assert_eq!(cache.restore("a2", "other.md").await.expect("restore"), None);
    }

    #[tokio::test]
    async fn test_conflict_writes_nothing() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        cache.add_file(b"P", "a1", &deps(&["p.sty"]), "a.md").await.expect("add");

        let err = cache
            .add_file(b"Q", "a1", &deps(&["q.sty"]), "a.md")
            .await
            .expect_err("conflict");
        assert!(matches!(err, CacheError::IndexConflict { .. }));
        let stats = cache.stats().await.expect("stats");
        assert_eq!((stats.entries, stats.artifacts), (1, 1));
        assert_eq!(cache.restore("a1", "a.md").await.expect("restore"), Some(b"P".to_vec()));

        assert_eq!(cache.release("a1", "a.md").await.expect("release"), 1);
        cache.add_file(b"Q", "a1", &deps(&["q.sty"]), "a.md").await.expect("re-add");
        assert_eq!(cache.restore("a1", "a.md").await.expect("restore"), Some(b"Q".to_vec()));
        assert_eq!(cache.stats().await.expect("stats").artifacts, 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_a_miss() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        cache.add_file(b"X", "a1", &[], "a.md").await.expect("add");
        cache.store.read().await.remove("a1-nodeps").await.expect("remove");
        assert_eq!(cache.restore("a1", "a.md").await.expect("restore"), None);
    }

    #[tokio::test]
    async fn test_cleanup_drops_stale_dependency_sets() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        cache.add_file(b"X", "a1", &deps(&["p.sty"]), "a.md").await.expect("add");
        cache.add_file(b"X", "a1", &deps(&["p.sty"]), "b.md").await.expect("add");
        cache.add_file(b"Y", "a2", &[], "c.md").await.expect("add");

        let catalog = MemoryCatalog::new();
        catalog.insert("a.md", deps(&["q.sty"]));
        catalog.insert("b.md", deps(&["p.sty"]));
        catalog.insert_unknown("c.md");

        let report = cache.clean_up(&catalog).await.expect("cleanup");
        assert_eq!(report.stale_references, 1);
        assert_eq!(report.entries_removed, 0);
        assert_eq!(cache.restore("a1", "a.md").await.expect("a"), None);
        assert_eq!(cache.restore("a1", "b.md").await.expect("b"), Some(b"X".to_vec()));
        assert_eq!(cache.restore("a2", "c.md").await.expect("c"), Some(b"Y".to_vec()));

        catalog.insert("b.md", deps(&["r.sty"]));
        let report = cache.clean_up(&catalog).await.expect("cleanup");
        assert_eq!(report.entries_removed, 1);
        assert_eq!(cache.stats().await.expect("stats").artifacts, 1);
    }

    #[tokio::test]
    async fn test_cleanup_drops_deleted_files() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        cache.add_file(b"X", "a1", &[], "a.md").await.expect("add");
        cache.add_file(b"Y", "a2", &[], "a.md").await.expect("add");
        cache.add_file(b"Y", "a2", &[], "b.md").await.expect("add");

        let catalog = MemoryCatalog::new();
        catalog.insert_unknown("b.md");
        let report = cache.clean_up(&catalog).await.expect("cleanup");
        assert_eq!(report.missing_files, 1);
        assert_eq!(report.entries_removed, 1);

        let stats = cache.stats().await.expect("stats");
        assert_eq!((stats.entries, stats.artifacts, stats.referencing_files), (1, 1, 1));
        assert_eq!(cache.restore("a2", "b.md").await.expect("b"), Some(b"Y".to_vec()));
        assert!(cache.clean_up(&catalog).await.expect("again").is_clean());
    }

    #[tokio::test]
    async fn test_cleanup_reconciles_storage() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        cache.add_file(b"X", "a1", &[], "a.md").await.expect("add");
        cache.add_file(b"Y", "a2", &[], "a.md").await.expect("add");
        {
            let store = cache.store.read().await;
            store.put("a9-nodeps", b"orphan").await.expect("put");
            store.remove("a2-nodeps").await.expect("remove");
        }
        let catalog = MemoryCatalog::new();
        catalog.insert_unknown("a.md");

        let report = cache.clean_up(&catalog).await.expect("cleanup");
        assert_eq!(report.orphan_artifacts, 1);
        assert_eq!(report.dangling_entries, 1);
        let stats = cache.stats().await.expect("stats");
        assert_eq!((stats.entries, stats.artifacts), (1, 1));
    }

    fn svg_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .expect("dir")
            .filter(|e| {
                e.as_ref()
                    .is_ok_and(|e| e.path().extension().is_some_and(|x| x == "svg"))
            })
            .count()
    }

    #[tokio::test]
    async fn test_switch_backend_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        let catalog = MemoryCatalog::new();
        for (i, file) in ["a.md", "b.md", "c.md"].iter().enumerate() {
            let body = format!("<svg>{}</svg>", i);
            let hash = content_hash(body.as_bytes());
            cache.add_file(body.as_bytes(), &hash, &[], file).await.expect("add");
            catalog.insert_unknown(*file);
        }

        let report = cache
            .switch_to_directory(dir.path(), "svg", &catalog)
            .await
            .expect("to directory");
        assert!(report.is_clean());
        assert_eq!(cache.backend().await, BackendKind::Directory);
        assert_eq!(svg_files(dir.path()), 3);

        cache.switch_to_memory(&catalog).await.expect("to memory");
        assert_eq!(cache.backend().await, BackendKind::Memory);
        assert_eq!(svg_files(dir.path()), 0);
        for (i, file) in ["a.md", "b.md", "c.md"].iter().enumerate() {
            let body = format!("<svg>{}</svg>", i);
            let restored = cache
                .restore(&content_hash(body.as_bytes()), file)
                .await
                .expect("restore");
            assert_eq!(restored, Some(body.into_bytes()));
        }
    }

    #[tokio::test]
    async fn test_switch_to_directory_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = MemoryCatalog::new();
        catalog.insert_unknown("a.md");
        let hash = content_hash(b"<svg/>");
        {
            let cache = ResultCache::in_memory(FallbackPolicy::Strict);
            cache.add_file(b"<svg/>", &hash, &[], "a.md").await.expect("add");
            cache
                .switch_to_directory(dir.path(), "svg", &catalog)
                .await
                .expect("to directory");
        }
        assert!(dir.path().join("index.json").exists());

        let cache = ResultCache::in_directory(dir.path(), "svg", FallbackPolicy::Strict)
            .await
            .expect("reopen");
        let report = cache.clean_up(&catalog).await.expect("gc");
        assert_eq!(report.orphan_artifacts, 0);
        assert_eq!(
            cache.restore(&hash, "a.md").await.expect("restore"),
            Some(b"<svg/>".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rejects_malformed_source_hash() {
        let cache = ResultCache::in_memory(FallbackPolicy::Strict);
        for bad in ["", "a-b", "../escape", "a/b"] {
            assert!(matches!(
                cache.add_file(b"X", bad, &[], "a.md").await,
                Err(CacheError::InvalidSourceHash(_))
            ));
            assert!(matches!(
                cache.restore(bad, "a.md").await,
                Err(CacheError::InvalidSourceHash(_))
            ));
        }
        assert_eq!(cache.stats().await.expect("stats").artifacts, 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let cache = ResultCache::in_directory(dir.path(), "svg", FallbackPolicy::Strict)
                .await
                .expect("open");
            cache.add_file(b"<svg/>", "a1", &deps(&["p.sty"]), "a.md").await.expect("add");
        }
        assert!(dir.path().join("index.json").exists());
        let cache = ResultCache::in_directory(dir.path(), "svg", FallbackPolicy::Strict)
            .await
            .expect("reopen");
        assert_eq!(cache.restore("a1", "a.md").await.expect("restore"), Some(b"<svg/>".to_vec()));

        assert_eq!(cache.remove_all_cached().await.expect("clear"), 1);
        assert_eq!(cache.restore("a1", "a.md").await.expect("restore"), None);
        assert!(!dir.path().join(format!("a1-{}.svg", dependency_set_hash(&["p.sty"]))).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_same_key() {
        let cache = Arc::new(ResultCache::in_memory(FallbackPolicy::Strict));
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .add_file(b"X", "a1", &deps(&["p.sty"]), &format!("f{}.md", i))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("add");
        }
        let stats = cache.stats().await.expect("stats");
        assert_eq!((stats.entries, stats.referencing_files), (1, 16));
    }
}
