//! Recording fakes for the host, the engine and the helper supervisor
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tunpoint_core::dialer::Resolver;
use tunpoint_core::{ControllerConfig, HostCallbacks};
use tunpoint_engine::{
    CounterRegistry, Destination, Engine, EngineConfig, EngineError, EngineInstance,
    EngineStream, StatsManager, SystemDialer,
};
use tunpoint_escort::{EscortError, FdCallback, ProcessSpec, Supervisor};

pub const VALID_CONFIG: &str = r#"{
    "log": { "loglevel": "warning" },
    "stats": {},
    "inbounds": [
        { "tag": "socks", "protocol": "socks", "listen": "127.0.0.1", "port": 10808 }
    ],
    "outbounds": [{ "tag": "proxy", "protocol": "vless" }]
}"#;

pub fn controller_config() -> ControllerConfig {
    ControllerConfig {
        data_dir: Some(PathBuf::from("/tmp/tunpoint-test")),
        resolve_max_retries: 1,
        resolve_retry_delay_ms: 10,
        ..ControllerConfig::new("com.example.vpn")
    }
}

/// Server name every [`StaticResolver::standard`] resolver knows
pub const KNOWN_SERVER: &str = "tunnel.example.com";
pub const KNOWN_SERVER_IP: &str = "192.0.2.10";

/// Resolver answering from a fixed table; unknown names fail
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
    pub lookups: AtomicUsize,
}

impl StaticResolver {
    /// Knows [`KNOWN_SERVER`] only
    pub fn standard() -> Arc<Self> {
        let mut records = HashMap::new();
        records.insert(
            KNOWN_SERVER.to_string(),
            vec![KNOWN_SERVER_IP.parse().unwrap()],
        );
        Arc::new(Self {
            records,
            lookups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup(&self, host: &str, _port: u16) -> io::Result<Vec<IpAddr>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.records.get(host).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", host))
        })
    }
}

/// Host that records every callback in call order
#[derive(Default)]
pub struct RecordingHost {
    events: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn record(&self, event: String) -> i32 {
        self.events.lock().unwrap().push(event);
        0
    }
}

impl HostCallbacks for RecordingHost {
    fn setup(&self, vpn_args: &str) -> i32 {
        self.record(format!("setup:{}", vpn_args))
    }

    fn prepare(&self) -> i32 {
        self.record("prepare".into())
    }

    fn shutdown(&self) -> i32 {
        self.record("shutdown".into())
    }

    fn protect(&self, _fd: i32) -> i32 {
        0
    }

    fn on_emit_status(&self, code: i32, message: &str) -> i32 {
        self.record(format!("status:{}:{}", code, message))
    }

    fn send_fd(&self) -> i32 {
        self.record("send_fd".into())
    }
}

pub struct FakeInstance {
    registry: Arc<CounterRegistry>,
    fail_start: bool,
    start_delay: Duration,
    probe_target: Option<SocketAddr>,
    pub started: AtomicBool,
    pub closed: AtomicBool,
}

#[async_trait]
impl EngineInstance for FakeInstance {
    async fn start(&self) -> tunpoint_engine::Result<()> {
        tokio::time::sleep(self.start_delay).await;
        if self.fail_start {
            return Err(EngineError::Start("inbound port in use".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> tunpoint_engine::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stats_manager(&self) -> Option<Arc<dyn StatsManager>> {
        Some(self.registry.clone())
    }

    async fn dial(
        &self,
        destination: &Destination,
    ) -> tunpoint_engine::Result<Box<dyn EngineStream>> {
        let target = self.probe_target.ok_or_else(|| EngineError::Dial {
            destination: destination.to_string(),
            reason: "no route".into(),
        })?;
        Ok(Box::new(TcpStream::connect(target).await?))
    }
}

/// Engine whose instances share one counter registry
#[derive(Default)]
pub struct FakeEngine {
    pub registry: Arc<CounterRegistry>,
    pub fail_start: bool,
    pub start_delay: Duration,
    pub probe_target: Option<SocketAddr>,
    pub constructed: Mutex<Vec<Arc<FakeInstance>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn construct_count(&self) -> usize {
        self.constructed.lock().unwrap().len()
    }

    pub fn last_instance(&self) -> Option<Arc<FakeInstance>> {
        self.constructed.lock().unwrap().last().cloned()
    }
}

impl Engine for FakeEngine {
    fn version(&self) -> String {
        "1.8.4".to_string()
    }

    fn construct(
        &self,
        _config: EngineConfig,
        _dialer: Arc<dyn SystemDialer>,
    ) -> tunpoint_engine::Result<Arc<dyn EngineInstance>> {
        let instance = Arc::new(FakeInstance {
            registry: self.registry.clone(),
            fail_start: self.fail_start,
            start_delay: self.start_delay,
            probe_target: self.probe_target,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.constructed.lock().unwrap().push(instance.clone());
        Ok(instance)
    }
}

/// Supervisor that records what it was asked to run without spawning anything
#[derive(Default)]
pub struct FakeSupervisor {
    pub fail: bool,
    pub runs: Mutex<Vec<ProcessSpec>>,
    pub callbacks: Mutex<Vec<FdCallback>>,
    pub shutdowns: AtomicUsize,
    escorting: AtomicBool,
}

impl FakeSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn run(
        &self,
        spec: ProcessSpec,
        on_started: FdCallback,
    ) -> tunpoint_escort::Result<()> {
        if self.fail {
            return Err(EscortError::Spawn {
                program: spec.program.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.runs.lock().unwrap().push(spec);
        self.callbacks.lock().unwrap().push(on_started);
        self.escorting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.escorting.store(false, Ordering::SeqCst);
    }

    fn is_escorting(&self) -> bool {
        self.escorting.load(Ordering::SeqCst)
    }
}

pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Polls from a plain thread, for tests without a runtime
pub fn wait_until_blocking(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
