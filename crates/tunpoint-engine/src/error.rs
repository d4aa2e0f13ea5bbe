//! Engine errors

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by an engine implementation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine config: {0}")]
    Config(String),

    #[error("failed to construct engine: {0}")]
    Construct(String),

    #[error("failed to start engine: {0}")]
    Start(String),

    #[error("dial {destination} failed: {reason}")]
    Dial { destination: String, reason: String },

    #[error("engine instance is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
