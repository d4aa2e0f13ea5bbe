//! Supervisor errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EscortError>;

#[derive(Debug, Error)]
pub enum EscortError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("helper is already being escorted")]
    AlreadyEscorting,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
