//! Blocking host facade
//!
//! Host platforms call in from their own threads without an async runtime.
//! [`TunnelPoint`] owns a runtime and blocks on the controller for them.
//! Calls made from inside a runtime, such as from a host callback, block a
//! helper thread instead.

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};
use tunpoint_engine::Engine;
use tunpoint_escort::Supervisor;

use crate::config::ControllerConfig;
use crate::controller::{LifecycleController, RunRequest};
use crate::dialer::Resolver;
use crate::error::{Error, ProbeError, Result};
use crate::host::HostCallbacks;

pub struct TunnelPoint {
    runtime: Runtime,
    controller: LifecycleController,
}

impl TunnelPoint {
    /// Point whose helper runs under a process escort
    pub fn new(
        host: Arc<dyn HostCallbacks>,
        engine: Arc<dyn Engine>,
        config: ControllerConfig,
    ) -> Result<Self> {
        Self::build(config, |config| {
            LifecycleController::with_escort(host, engine, config)
        })
    }

    pub fn with_supervisor(
        host: Arc<dyn HostCallbacks>,
        engine: Arc<dyn Engine>,
        supervisor: Arc<dyn Supervisor>,
        config: ControllerConfig,
    ) -> Result<Self> {
        Self::build(config, |config| {
            LifecycleController::new(host, engine, supervisor, config)
        })
    }

    pub fn with_resolver(
        host: Arc<dyn HostCallbacks>,
        engine: Arc<dyn Engine>,
        supervisor: Arc<dyn Supervisor>,
        resolver: Arc<dyn Resolver>,
        config: ControllerConfig,
    ) -> Result<Self> {
        Self::build(config, |config| {
            LifecycleController::with_resolver(host, engine, supervisor, resolver, config)
        })
    }

    fn build(
        config: ControllerConfig,
        make: impl FnOnce(ControllerConfig) -> Result<LifecycleController>,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("tunpoint")
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;

        let controller = {
            let _guard = runtime.enter();
            make(config)?
        };
        info!("Tunnel point ready for {}", controller.config().package_name);

        Ok(Self {
            runtime,
            controller,
        })
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn run_loop(&self, request: RunRequest) -> Result<()> {
        self.block_on(self.controller.start(request))
    }

    pub fn stop_loop(&self) -> Result<()> {
        self.block_on(self.controller.stop())
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn query_stats(&self, inbound_tag: &str, direction: &str) -> i64 {
        self.controller.query_counter(inbound_tag, direction)
    }

    /// Milliseconds, or `-1` with the reason
    pub fn measure_delay(&self) -> (i64, Option<ProbeError>) {
        match self.block_on(self.controller.measure_delay()) {
            Ok(ms) => (ms, None),
            Err(e) => (-1, Some(e)),
        }
    }

    pub fn check_version_extended(&self) -> String {
        self.controller.check_version_extended()
    }

    fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        if Handle::try_current().is_err() {
            return self.runtime.block_on(future);
        }

        debug!("Blocking call from inside a runtime, using a helper thread");
        std::thread::scope(|scope| {
            match scope.spawn(|| self.runtime.block_on(future)).join() {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }
}
