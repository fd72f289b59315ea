//! # texrender-cache
//!
//! Content-addressed, dependency-aware cache of rendered artifacts.
//!
//! An artifact is keyed by the BLAKE3 hash of its source plus the hash of
//! the dependency set it was rendered with. Each key records which
//! referencing files last rendered to it, so artifacts can be reclaimed
//! once nothing references them.
//!
//! ```
//! use texrender_cache::{content_hash, FallbackPolicy, ResultCache};
//!
//! # let runtime = tokio::runtime::Runtime::new().unwrap();
//! # runtime.block_on(async {
//! let cache = ResultCache::in_memory(FallbackPolicy::Strict);
//! let hash = content_hash(b"$x^2$");
//! cache.add_file(b"<svg/>", &hash, &["amsmath.sty".to_string()], "notes.md").await.unwrap();
//! assert!(cache.restore(&hash, "notes.md").await.unwrap().is_some());
//! # });
//! ```

pub mod cache;
pub mod catalog;
pub mod error;
pub mod hash;
pub mod index;
pub mod storage;

pub use cache::{CacheStats, CleanupReport, FallbackPolicy, ResultCache};
pub use catalog::{FsCatalog, MemoryCatalog, SourceCatalog};
pub use error::{CacheError, CacheResult};
pub use hash::{artifact_name, content_hash, dependency_set_hash, NO_DEPENDENCIES};
pub use index::{CacheEntry, CacheIndex, IndexStore, JsonIndexStore, MemoryIndexStore, INDEX_VERSION};
pub use storage::{ArtifactStore, BackendKind, DirectoryStore, MemoryStore};
