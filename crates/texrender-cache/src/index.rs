//! Cache index: which artifacts exist and which files reference them.
//!
//! ```text
//! source_hash ─┬─ CacheEntry { deps: [a.sty],       refs: {x.md, y.md} }
//!              └─ CacheEntry { deps: [a.sty, b.sty], refs: {z.md} }
//! ```
//!
//! Within one source hash a file is referenced by at most one entry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::hash::{artifact_name, dependency_set_hash};

/// On-disk schema version.
pub const INDEX_VERSION: u32 = 1;

/// File name of the JSON index inside a cache root.
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// As given by the first caller; hashed order-independently.
    pub dependencies: Vec<String>,
    pub dependency_hash: String,
    pub referencing_files: BTreeSet<String>,
}

impl CacheEntry {
    pub fn new(dependencies: Vec<String>) -> Self {
        let dependency_hash = dependency_set_hash(&dependencies);
        Self {
            dependencies,
            dependency_hash,
            referencing_files: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheIndex {
    sources: BTreeMap<String, Vec<CacheEntry>>,
}

/// Versioned serialized form.
#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    entries: Vec<(String, Vec<CacheEntry>)>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of distinct source hashes.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn entry_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    pub fn entries(&self, source_hash: &str) -> &[CacheEntry] {
        self.sources
            .get(source_hash)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every (source hash, entry) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.sources
            .iter()
            .flat_map(|(source, entries)| entries.iter().map(move |entry| (source.as_str(), entry)))
    }

    /// Artifact names of every entry.
    pub fn artifact_names(&self) -> BTreeSet<String> {
        self.iter()
            .map(|(source, entry)| artifact_name(source, &entry.dependency_hash))
            .collect()
    }

    /// Every referencing file across the index.
    pub fn referencing_files(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|(_, entry)| entry.referencing_files.iter().cloned())
            .collect()
    }

    pub fn find(&self, source_hash: &str, dependency_hash: &str) -> Option<&CacheEntry> {
        self.entries(source_hash)
            .iter()
            .find(|entry| entry.dependency_hash == dependency_hash)
    }

    /// The entry of `source_hash` that `file` references.
    pub fn find_referenced_by(&self, source_hash: &str, file: &str) -> Option<&CacheEntry> {
        self.entries(source_hash)
            .iter()
            .find(|entry| entry.referencing_files.contains(file))
    }

    /// Fails if `file` references a different dependency set of `source_hash`.
    pub fn check_conflict(&self, source_hash: &str, dependency_hash: &str, file: &str) -> CacheResult<()> {
        match self.find_referenced_by(source_hash, file) {
            Some(entry) if entry.dependency_hash != dependency_hash => Err(CacheError::IndexConflict {
                source_hash: source_hash.to_string(),
                file: file.to_string(),
                existing: entry.dependency_hash.clone(),
                requested: dependency_hash.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Record `file` as referencing the entry for `dependencies`, creating it
    /// if needed. Returns true when the entry is new.
    pub fn record(&mut self, source_hash: &str, dependencies: &[String], file: &str) -> bool {
        let dependency_hash = dependency_set_hash(dependencies);
        let entries = self.sources.entry(source_hash.to_string()).or_default();
        let (entry, created) = match entries
            .iter()
            .position(|entry| entry.dependency_hash == dependency_hash)
        {
            Some(i) => (&mut entries[i], false),
            None => {
                entries.push(CacheEntry::new(dependencies.to_vec()));
                let last = entries.len() - 1;
                (&mut entries[last], true)
            }
        };
        entry.referencing_files.insert(file.to_string());
        created
    }

    /// Remove `file` from entries of `source_hash` accepted by `filter`.
    /// Returns the artifact names of entries that became empty and were
    /// dropped.
    pub fn remove_reference_where<F>(&mut self, source_hash: &str, file: &str, filter: F) -> Vec<String>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let Some(entries) = self.sources.get_mut(source_hash) else {
            return Vec::new();
        };
        for entry in entries.iter_mut().filter(|entry| filter(entry)) {
            entry.referencing_files.remove(file);
        }
        let mut dropped = Vec::new();
        entries.retain(|entry| {
            if entry.referencing_files.is_empty() {
                dropped.push(artifact_name(source_hash, &entry.dependency_hash));
                false
            } else {
                true
            }
        });
        if entries.is_empty() {
            self.sources.remove(source_hash);
        }
        dropped
    }

    /// Remove `file` from every entry of `source_hash`.
    pub fn remove_reference(&mut self, source_hash: &str, file: &str) -> Vec<String> {
        self.remove_reference_where(source_hash, file, |_| true)
    }

    /// Remove `file` everywhere.
    pub fn forget_file(&mut self, file: &str) -> Vec<String> {
        let sources: Vec<String> = self.sources.keys().cloned().collect();
        sources
            .iter()
            .flat_map(|source| self.remove_reference(source, file))
            .collect()
    }

    /// Source hashes with an entry referencing `file`.
    pub fn sources_referenced_by(&self, file: &str) -> Vec<String> {
        self.sources
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.referencing_files.contains(file)))
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// Drop the entry named by an artifact. Returns true if it existed.
    pub fn remove_artifact(&mut self, name: &str) -> bool {
        let mut removed = false;
        self.sources.retain(|source, entries| {
            entries.retain(|entry| {
                let hit = artifact_name(source, &entry.dependency_hash) == name;
                removed |= hit;
                !hit
            });
            !entries.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn to_json(&self) -> CacheResult<String> {
        let document = IndexDocument {
            version: INDEX_VERSION,
            entries: self
                .sources
                .iter()
                .map(|(source, entries)| (source.clone(), entries.clone()))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn from_json(json: &str) -> CacheResult<Self> {
        let document: IndexDocument = serde_json::from_str(json)?;
        if document.version != INDEX_VERSION {
            return Err(CacheError::UnsupportedVersion {
                found: document.version,
                expected: INDEX_VERSION,
            });
        }
        Ok(Self {
            sources: document.entries.into_iter().collect(),
        })
    }
}

/// Where the index is persisted.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn load(&self) -> CacheResult<CacheIndex>;
    async fn save(&self, index: &CacheIndex) -> CacheResult<()>;
}

/// Keeps the serialized index in memory.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    json: Mutex<Option<String>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn load(&self) -> CacheResult<CacheIndex> {
        match self.json.lock().as_deref() {
            Some(json) => CacheIndex::from_json(json),
            None => Ok(CacheIndex::new()),
        }
    }

    async fn save(&self, index: &CacheIndex) -> CacheResult<()> {
        let json = index.to_json()?;
        *self.json.lock() = Some(json);
        Ok(())
    }
}

/// JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonIndexStore {
    path: PathBuf,
}

impl JsonIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<root>/index.json`.
    pub fn in_root(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(INDEX_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IndexStore for JsonIndexStore {
    async fn load(&self) -> CacheResult<CacheIndex> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => CacheIndex::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheIndex::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, index: &CacheIndex) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = index.to_json()?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = index.entry_count(), "index saved");
        Ok(())
    }
}
