//! Control plane errors

use std::time::Duration;
use thiserror::Error;
use tunpoint_engine::EngineError;
use tunpoint_escort::EscortError;

/// Result type alias for control plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the lifecycle controller
#[derive(Debug, Error)]
pub enum Error {
    #[error("config parse error: {0}")]
    ConfigParse(#[source] EngineError),

    #[error("failed to construct engine: {0}")]
    EngineConstruct(#[source] EngineError),

    #[error("failed to start engine: {0}")]
    EngineStart(#[source] EngineError),

    #[error("failed to start packet-capture helper: {0}")]
    SupervisorSpawn(#[from] EscortError),

    /// Never returned from `start`; the run is stopped and the host notified instead
    #[error("server {0} could not be resolved")]
    ResolutionFailure(String),

    #[error("invalid controller settings: {0}")]
    Settings(String),

    #[error("failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failures reported synchronously by `start`
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigParse(_)
                | Error::EngineConstruct(_)
                | Error::EngineStart(_)
                | Error::SupervisorSpawn(_)
        )
    }
}

/// Latency probe errors. Never affect the running state.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("engine instance is nil")]
    NilInstance,

    #[error("invalid probe url: {0}")]
    InvalidUrl(String),

    #[error("probe transport error: {0}")]
    Transport(String),

    #[error("status != 204: {0}")]
    StatusMismatch(http::StatusCode),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}
