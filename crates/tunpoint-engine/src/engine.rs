//! Engine factory and instance traits

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::EngineConfig;
use crate::destination::Destination;
use crate::dialer::SystemDialer;
use crate::error::Result;
use crate::stats::StatsManager;

/// Byte stream returned by [`EngineInstance::dial`]
pub trait EngineStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> EngineStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Builds engine instances from parsed configuration
pub trait Engine: Send + Sync {
    /// Engine version string, e.g. `1.8.4`
    fn version(&self) -> String;

    /// Construct a new, not yet started, instance.
    ///
    /// `dialer` must be used for every outbound connection the instance makes.
    fn construct(
        &self,
        config: EngineConfig,
        dialer: Arc<dyn SystemDialer>,
    ) -> Result<Arc<dyn EngineInstance>>;
}

/// A constructed engine instance
#[async_trait]
pub trait EngineInstance: Send + Sync {
    /// Start relaying. Called at most once per instance.
    async fn start(&self) -> Result<()>;

    /// Stop relaying and release every resource held by the instance
    async fn close(&self) -> Result<()>;

    /// Traffic counters, when the configuration enables statistics
    fn stats_manager(&self) -> Option<Arc<dyn StatsManager>>;

    /// Open a connection through the engine's routing and outbounds
    async fn dial(&self, destination: &Destination) -> Result<Box<dyn EngineStream>>;
}
