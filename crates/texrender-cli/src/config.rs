//! Configuration, loaded from RON.
//!
//! Every field has a default, so an empty file (or none at all) works:
//!
//! ```ron
//! (
//!     cache: (backend: directory, extension: "svg"),
//!     engine: (
//!         passes: [
//!             (program: "latex", args: ["-interaction=nonstopmode", "{main}"], output_extension: "dvi"),
//!             (program: "dvisvgm", args: ["--stdout", "{main}"], output_extension: "svg"),
//!         ],
//!     ),
//!     support_dir: Some("/usr/share/texrender/support"),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use texrender_cache::{BackendKind, FallbackPolicy};
use texrender_engine::Composition;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    /// Files broadcast to every engine before each compile.
    pub support_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Defaults to the platform cache directory.
    pub root: Option<PathBuf>,
    pub backend: BackendKind,
    /// Extension of stored artifacts.
    pub extension: String,
    pub fallback: FallbackPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            backend: BackendKind::Directory,
            extension: "pdf".into(),
            fallback: FallbackPolicy::Strict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub task_timeout_secs: u64,
    /// Base URL for packages and fonts missing from the support files.
    pub network_endpoint: Option<String>,
    /// One pass per engine; two passes run chained.
    pub passes: Vec<PassConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 120,
            network_endpoint: None,
            passes: vec![PassConfig::default()],
        }
    }
}

/// External typesetter program for one engine. `{main}` in `args` is
/// replaced by the main file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    pub program: String,
    pub args: Vec<String>,
    pub output_extension: String,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            program: "pdflatex".into(),
            args: vec![
                "-interaction=nonstopmode".into(),
                "-halt-on-error".into(),
                "{main}".into(),
            ],
            output_extension: "pdf".into(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/texrender/config.ron` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("texrender").join("config.ron"))
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Config = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the default path if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading config");
        Self::from_ron(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.engine.passes.len() {
            1 | 2 => {}
            n => {
                return Err(ConfigError::Invalid(format!(
                    "engine.passes must hold one or two passes, found {}",
                    n
                )));
            }
        }
        if self.engine.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid("engine.task_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache
            .root
            .clone()
            .or_else(|| dirs::cache_dir().map(|p| p.join("texrender")))
            .unwrap_or_else(|| std::env::temp_dir().join("texrender-cache"))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.task_timeout_secs)
    }

    pub fn composition(&self) -> Composition {
        if self.engine.passes.len() > 1 {
            Composition::Chained
        } else {
            Composition::Single
        }
    }

    /// Extension of the final artifact.
    pub fn output_extension(&self) -> &str {
        self.engine
            .passes
            .last()
            .map(|pass| pass.output_extension.as_str())
            .unwrap_or("pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_ron("()").expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.composition(), Composition::Single);
        assert_eq!(config.task_timeout(), Duration::from_secs(120));
        assert_eq!(config.cache.backend, BackendKind::Directory);
    }

    #[test]
    fn test_chained_passes() {
        let config = Config::from_ron(
            r#"(
                cache: (backend: memory, fallback: first_entry, extension: "svg"),
                engine: (
                    task_timeout_secs: 30,
                    network_endpoint: Some("https://texlive.example.org/pkg"),
                    passes: [
                        (program: "latex", args: ["{main}"], output_extension: "dvi"),
                        (program: "dvisvgm", output_extension: "svg"),
                    ],
                ),
            )"#,
        )
        .expect("parse");
        assert_eq!(config.composition(), Composition::Chained);
        assert_eq!(config.cache.fallback, FallbackPolicy::FirstEntry);
        assert_eq!(config.cache.backend, BackendKind::Memory);
        assert_eq!(config.output_extension(), "svg");
        assert_eq!(config.engine.passes[1].args, PassConfig::default().args);
    }

    #[test]
    fn test_rejects_bad_pass_count() {
        let err = Config::from_ron("(engine: (passes: []))").expect_err("no passes");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.ron");
        std::fs::write(&path, r#"(support_dir: Some("/opt/tex"))"#).expect("write");
        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.support_dir, Some(PathBuf::from("/opt/tex")));

        let missing = Config::load(Some(&dir.path().join("nope.ron")));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
