//! Engine protocol errors.

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineStatus;

/// Errors from the engine client and the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A task was issued while the engine was not `Ready`.
    #[error("engine not ready (status: {0})")]
    NotReady(EngineStatus),

    /// Channel closed, protocol violation or malformed traffic.
    #[error("engine unusable: {0}")]
    Unusable(String),

    /// No response within the task timeout.
    #[error("{cmd} timed out after {after:?}")]
    Timeout { cmd: String, after: Duration },

    /// The orchestrator's engine set does not fit the operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The host reported failure for a non-compile command.
    #[error("host failed {cmd}: {message}")]
    Host { cmd: String, message: String },

    #[error("failed to start engine host: {0}")]
    Spawn(#[from] std::io::Error),
}

impl EngineError {
    /// True when the engine that produced this error must be rebuilt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineError::Unusable(_) | EngineError::Timeout { .. } | EngineError::Host { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
