//! Lifecycle controller
//!
//! Owns the start/stop state machine. A single async mutex serializes every
//! transition; the running flag and the published engine instance are read
//! without it.
//!
//! Startup sequence, rolled back completely on any failure:
//!
//! 1. record the package identity
//! 2. create the run's cancel signal
//! 3. resolve the server in the background
//! 4. watch resolution against cancellation
//! 5. start the packet-capture helper
//! 6. parse the engine configuration
//! 7. construct the engine instance
//! 8. publish the instance and its counters
//! 9. start the instance
//! 10. prepare and set up the host tunnel, report "Running"

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tunpoint_engine::{Engine, EngineConfig, EngineInstance, StatsManager};
use tunpoint_escort::{Escort, EscortConfig, FdCallback, ProcessSpec, Supervisor};

use crate::addressing::{helper_args, helper_path, vpn_setup_arg};
use crate::assets::AssetEnv;
use crate::cancel::CancelSignal;
use crate::config::ControllerConfig;
use crate::dialer::{ProtectedDialer, ResolveSettings, Resolver, SystemResolver};
use crate::error::{Error, ProbeError, Result};
use crate::host::{HostCallbacks, STATUS_OK};
use crate::probe::LatencyProbe;
use crate::race::{self, RaceWinner, Resolution};
use crate::stats;
use crate::version;

/// Inputs of one `start` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Engine configuration in its native JSON format
    pub config_text: String,
    /// Tunnel server, `host:port` or bare host
    pub domain_name: Option<String>,
    pub enable_local_dns: bool,
    pub forward_ipv6: bool,
}

impl RunRequest {
    pub fn new(config_text: impl Into<String>) -> Self {
        Self {
            config_text: config_text.into(),
            ..Self::default()
        }
    }

    pub fn with_domain(mut self, domain_name: impl Into<String>) -> Self {
        self.domain_name = Some(domain_name.into());
        self
    }

    pub fn with_local_dns(mut self, enabled: bool) -> Self {
        self.enable_local_dns = enabled;
        self
    }

    pub fn with_ipv6(mut self, forward: bool) -> Self {
        self.forward_ipv6 = forward;
        self
    }
}

/// Parse-only validation of engine configuration text.
/// Touches neither the running state nor the asset mapping.
pub fn test_config(config_text: &str) -> Result<EngineConfig> {
    EngineConfig::from_json(config_text).map_err(Error::ConfigParse)
}

/// Engine instance published while running
struct LiveEngine {
    instance: Arc<dyn EngineInstance>,
    stats: Option<Arc<dyn StatsManager>>,
}

/// State only touched under the transition lock
#[derive(Default)]
struct RunState {
    package_name: String,
    cancel: Option<CancelSignal>,
}

struct Inner {
    host: Arc<dyn HostCallbacks>,
    engine: Arc<dyn Engine>,
    supervisor: Arc<dyn Supervisor>,
    dialer: Arc<ProtectedDialer>,
    config: ControllerConfig,
    probe: LatencyProbe,
    running: AtomicBool,
    transition: Mutex<RunState>,
    live: RwLock<Option<LiveEngine>>,
}

/// Start/stop state machine of the tunnel. Clones share the same state.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    pub fn new(
        host: Arc<dyn HostCallbacks>,
        engine: Arc<dyn Engine>,
        supervisor: Arc<dyn Supervisor>,
        config: ControllerConfig,
    ) -> Result<Self> {
        Self::with_resolver(host, engine, supervisor, Arc::new(SystemResolver), config)
    }

    /// Controller looking the tunnel server up through `resolver`.
    ///
    /// Installs the process asset mapping from `config`; fails with
    /// [`Error::Settings`] if a different mapping is already installed.
    pub fn with_resolver(
        host: Arc<dyn HostCallbacks>,
        engine: Arc<dyn Engine>,
        supervisor: Arc<dyn Supervisor>,
        resolver: Arc<dyn Resolver>,
        config: ControllerConfig,
    ) -> Result<Self> {
        let probe =
            LatencyProbe::new(&config.probe_url).map_err(|e| Error::Settings(e.to_string()))?;
        AssetEnv::init(config.asset_config())?;
        let dialer = Arc::new(ProtectedDialer::with_resolver(
            host.clone(),
            resolver,
            ResolveSettings {
                max_retries: config.resolve_max_retries,
                retry_delay: config.resolve_retry_delay(),
            },
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                host,
                engine,
                supervisor,
                dialer,
                config,
                probe,
                running: AtomicBool::new(false),
                transition: Mutex::new(RunState::default()),
                live: RwLock::new(None),
            }),
        })
    }

    /// Controller whose helper runs under a process [`Escort`]
    pub fn with_escort(
        host: Arc<dyn HostCallbacks>,
        engine: Arc<dyn Engine>,
        config: ControllerConfig,
    ) -> Result<Self> {
        let escort = Escort::new(EscortConfig {
            max_restarts: config.helper_max_restarts,
            restart_delay: config.helper_restart_delay(),
            fd_handoff_delay: config.fd_handoff_delay(),
        });
        Self::new(host, engine, Arc::new(escort), config)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Dialer handed to every engine instance this controller constructs
    pub fn dialer(&self) -> Arc<ProtectedDialer> {
        self.inner.dialer.clone()
    }

    /// Bring the tunnel up. A no-op when already running.
    pub async fn start(&self, request: RunRequest) -> Result<()> {
        let mut state = self.inner.transition.lock().await;
        state.package_name = self.inner.config.package_name.clone();

        if self.is_running() {
            debug!("Start requested while running, ignoring");
            return Ok(());
        }

        let cancel = CancelSignal::new();
        let span = info_span!("run", run = %cancel.run_id());
        self.start_run(&mut state, request, cancel)
            .instrument(span)
            .await
    }

    async fn start_run(
        &self,
        state: &mut RunState,
        request: RunRequest,
        cancel: CancelSignal,
    ) -> Result<()> {
        let resolution = race::launch(
            self.inner.dialer.clone(),
            request.domain_name.clone(),
            request.forward_ipv6,
            cancel.clone(),
        );
        self.spawn_watcher(resolution, cancel.clone(), request.domain_name.clone());
        state.cancel = Some(cancel);

        match self.bring_up(&state.package_name, &request).await {
            Ok(()) => {
                info!("Tunnel running");
                Ok(())
            }
            Err(e) => {
                error!("Failed to start tunnel: {}", e);
                if let Some(cancel) = state.cancel.take() {
                    cancel.fire();
                }
                self.release().await;
                Err(e)
            }
        }
    }

    async fn bring_up(&self, package_name: &str, request: &RunRequest) -> Result<()> {
        let inner = &self.inner;

        let data_dir = inner.config.data_dir_for(package_name);
        let spec = ProcessSpec::new(
            helper_path(&inner.config, &data_dir),
            helper_args(
                &inner.config,
                &data_dir,
                request.enable_local_dns,
                request.forward_ipv6,
            ),
        );
        let host = inner.host.clone();
        let send_fd: FdCallback = Arc::new(move || host.send_fd());
        inner.supervisor.run(spec, send_fd).await?;

        info!(
            enable_local_dns = request.enable_local_dns,
            forward_ipv6 = request.forward_ipv6,
            domain = request.domain_name.as_deref().unwrap_or(""),
            "Loading engine config"
        );
        let config = EngineConfig::from_json(&request.config_text).map_err(Error::ConfigParse)?;

        let instance = inner
            .engine
            .construct(config, inner.dialer.clone())
            .map_err(Error::EngineConstruct)?;
        let stats = instance.stats_manager();
        self.publish(Some(LiveEngine {
            instance: instance.clone(),
            stats,
        }));

        info!("Starting engine");
        inner.running.store(true, Ordering::Release);
        if let Err(e) = instance.start().await {
            inner.running.store(false, Ordering::Release);
            return Err(Error::EngineStart(e));
        }

        inner.host.prepare();
        inner.host.setup(&vpn_setup_arg(
            inner.config.mtu,
            request.enable_local_dns,
            request.forward_ipv6,
        ));
        inner.host.on_emit_status(STATUS_OK, "Running");
        Ok(())
    }

    /// Tear the tunnel down. A no-op when not running.
    pub async fn stop(&self) -> Result<()> {
        self.stop_run(None).await;
        Ok(())
    }

    /// Stop the current run. With `expected` set, only stops if that signal
    /// still belongs to the current run. Returns whether anything stopped.
    async fn stop_run(&self, expected: Option<&CancelSignal>) -> bool {
        let mut state = self.inner.transition.lock().await;
        if !self.is_running() {
            return false;
        }

        if let Some(expected) = expected {
            let current = state
                .cancel
                .as_ref()
                .map_or(false, |cancel| cancel.same_run(expected));
            if !current {
                debug!("Ignoring stop from stale run {}", expected.run_id());
                return false;
            }
        }

        if let Some(cancel) = state.cancel.take() {
            cancel.fire();
        }
        self.release().await;
        info!("Tunnel closed");
        self.inner.host.on_emit_status(STATUS_OK, "Closed");
        true
    }

    /// Release everything a run holds. Called under the transition lock.
    async fn release(&self) {
        self.inner.running.store(false, Ordering::Release);

        if let Some(live) = self.publish(None) {
            if let Err(e) = live.instance.close().await {
                warn!("Failed to close engine instance: {}", e);
            }
        }

        self.inner.supervisor.shutdown().await;
        self.inner.dialer.reset();
    }

    fn spawn_watcher(
        &self,
        mut resolution: Resolution,
        cancel: CancelSignal,
        domain: Option<String>,
    ) {
        let controller: Weak<Inner> = Arc::downgrade(&self.inner);
        let span = info_span!("watch", run = %cancel.run_id());

        tokio::spawn(
            async move {
                let outcome = match race::race(&mut resolution, &cancel).await {
                    RaceWinner::Cancelled => {
                        debug!("Run cancelled, watcher exiting");
                        return;
                    }
                    RaceWinner::Completed(outcome) => outcome,
                };

                let Some(inner) = controller.upgrade() else {
                    return;
                };
                if inner.dialer.is_server_ready() {
                    debug!("Server ready ({:?})", outcome);
                    return;
                }

                let failure = Error::ResolutionFailure(domain.unwrap_or_default());
                error!("{}, shutting down", failure);
                let controller = LifecycleController { inner };
                if !controller.stop_run(Some(&cancel)).await {
                    return;
                }

                // The host may re-enter the blocking facade from `shutdown`
                let host = controller.inner.host.clone();
                drop(controller);
                if let Err(e) = tokio::task::spawn_blocking(move || host.shutdown()).await {
                    warn!("Host shutdown callback failed: {}", e);
                }
            }
            .instrument(span),
        );
    }

    /// Lock-free; may briefly lag a transition in progress
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Traffic since the previous query for `inbound_tag` and `direction`
    /// (`uplink` or `downlink`). Zero when not running.
    pub fn query_counter(&self, inbound_tag: &str, direction: &str) -> i64 {
        let manager = self.read_live(|live| live.stats.clone()).flatten();
        stats::query(manager.as_deref(), inbound_tag, direction)
    }

    /// Probe round-trip time through the running engine
    pub async fn measure_delay(&self) -> std::result::Result<i64, ProbeError> {
        let instance = self.read_live(|live| live.instance.clone());
        self.inner.probe.measure(instance.as_ref()).await
    }

    pub fn check_version_extended(&self) -> String {
        version::check_version_extended(self.inner.engine.as_ref())
    }

    fn read_live<T>(&self, f: impl FnOnce(&LiveEngine) -> T) -> Option<T> {
        let guard = match self.inner.live.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(f)
    }

    /// Swap the published engine, returning the previous one
    fn publish(&self, live: Option<LiveEngine>) -> Option<LiveEngine> {
        let mut guard = match self.inner.live.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, live)
    }
}
