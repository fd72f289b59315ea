//! Cache errors.
//!
//! A missing artifact is never an error: lookups degrade to a miss.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// A file would be recorded under two dependency sets of one source.
    #[error("{file} already references {source_hash}-{existing}, refusing {source_hash}-{requested}")]
    IndexConflict {
        source_hash: String,
        file: String,
        existing: String,
        requested: String,
    },

    /// Source hashes are lowercase hex; anything else could escape the
    /// store's naming scheme.
    #[error("invalid source hash {0:?}")]
    InvalidSourceHash(String),

    #[error("unsupported cache index version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// A migrated artifact did not read back identically.
    #[error("artifact {0} failed verification after migration")]
    MigrationMismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;
