//! Engine error types.

use tandem_core::ConfigError;
use thiserror::Error;

/// Errors surfaced by the engine handle.
///
/// Intents never fail: their outcomes arrive as events. Only construction
/// and state queries return these.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Session configuration was rejected.
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),

    /// The engine's actor task has stopped.
    #[error("engine stopped")]
    Stopped,

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON for `SessionConfig`.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
