//! # texrender-cli
//!
//! Library half of the `texrender` binary: configuration and the render
//! pipeline, kept here so they can be tested without spawning processes.

pub mod config;
pub mod render;

pub use config::{CacheConfig, Config, ConfigError, EngineConfig, PassConfig};
pub use render::{
    compiler_for, open_cache, render, spawn_engines, working_dir_catalog, RenderError,
    RenderOutcome, RenderRequest,
};
