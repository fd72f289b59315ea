//! Package and font lookup for the engine host.
//!
//! Lookups go: remembered result, then the support area, then the network
//! endpoint. A hit on the endpoint becomes a lazy file under the support
//! area, so nothing is downloaded until the typesetter reads it. Both
//! outcomes are remembered per category and survive across compiles
//! through `fetch-cache-data` / `write-cache-data`.

use std::collections::BTreeMap;

use texrender_vfs::{HttpRangeFetcher, RangeFetcher, Vfs, DEFAULT_CHUNK_SIZE};
use tracing::{debug, info};

use crate::protocol::CacheData;

/// Directory in the host VFS that holds support and package files.
pub const SUPPORT_DIR: &str = "/tex";

/// Kind of file being looked up; selects the endpoint sub-path and cache keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    /// Classes, packages and other TeX inputs.
    Texlive,
    Font,
}

impl Category {
    fn found_key(self) -> String {
        format!("{}-found", self)
    }

    fn missing_key(self) -> String {
        format!("{}-missing", self)
    }
}

/// Builds a fetcher for a remote file URL.
pub type FetcherFactory = Box<dyn Fn(&str) -> Box<dyn RangeFetcher> + Send>;

pub struct PackageResolver {
    endpoint: Option<String>,
    cache: CacheData,
    fetchers: FetcherFactory,
}

impl std::fmt::Debug for PackageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageResolver")
            .field("endpoint", &self.endpoint)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for PackageResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageResolver {
    pub fn new() -> Self {
        Self::with_fetchers(Box::new(|url: &str| {
            Box::new(HttpRangeFetcher::new(url)) as Box<dyn RangeFetcher>
        }))
    }

    /// Use `fetchers` instead of HTTP to reach the endpoint.
    pub fn with_fetchers(fetchers: FetcherFactory) -> Self {
        Self {
            endpoint: None,
            cache: CacheData::new(),
            fetchers,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Point lookups at a new endpoint. Remembered misses are forgotten,
    /// since the new endpoint may have them.
    pub fn set_endpoint(&mut self, url: impl Into<String>) {
        let url = url.into();
        info!(endpoint = %url, "network endpoint set");
        self.endpoint = Some(url.trim_end_matches('/').to_string());
        for category in [Category::Texlive, Category::Font] {
            self.cache.remove(&category.missing_key());
        }
    }

    /// Snapshot of the lookup maps.
    pub fn cache_data(&self) -> CacheData {
        self.cache.clone()
    }

    /// Replace the lookup maps wholesale.
    pub fn replace_cache_data(&mut self, cache: CacheData) {
        self.cache = cache;
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn remembered(&self, key: &str, name: &str) -> Option<&String> {
        self.cache.get(key).and_then(|map| map.get(name))
    }

    fn remember(&mut self, key: String, name: &str, value: String) {
        self.cache
            .entry(key)
            .or_insert_with(BTreeMap::new)
            .insert(name.to_string(), value);
    }

    /// Resolve `name` to a VFS path, making it available if possible.
    pub fn resolve(&mut self, vfs: &mut Vfs, category: Category, name: &str) -> Option<String> {
        if name.is_empty() || name.contains('/') {
            return None;
        }
        if let Some(path) = self.remembered(&category.found_key(), name) {
            if vfs.exists(path) {
                return Some(path.clone());
            }
        }
        if self.remembered(&category.missing_key(), name).is_some() {
            return None;
        }

        let path = texrender_vfs::path::join(SUPPORT_DIR, name);
        if vfs.exists(&path) {
            self.remember(category.found_key(), name, path.clone());
            return Some(path);
        }

        let Some(endpoint) = self.endpoint.clone() else {
            self.remember(category.missing_key(), name, String::new());
            return None;
        };
        let url = format!("{}/{}/{}", endpoint, category, name);
        let fetcher = (self.fetchers)(&url);
        let lazy = match fetcher.length() {
            Ok(_) => vfs.create_lazy_file(&path, fetcher, DEFAULT_CHUNK_SIZE),
            Err(e) => Err(e),
        };
        match lazy {
            Ok(_) => {
                debug!(%category, name, %url, "resolved from endpoint");
                self.remember(category.found_key(), name, path.clone());
                Some(path)
            }
            Err(e) => {
                debug!(%category, name, %url, error = %e, "not available");
                self.remember(category.missing_key(), name, String::new());
                None
            }
        }
    }
}
