//! Helper process escort
//!
//! Spawns the helper, restarts it when it exits while still escorted, and
//! hands the capture file descriptor back to the host shortly after every
//! spawn so the fresh process can pick it up.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EscortError, Result};

/// Called after each spawn to hand the capture fd to the helper; returns a host status code
pub type FdCallback = Arc<dyn Fn() -> i32 + Send + Sync>;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Launches and keeps the helper process alive
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Spawn the helper. Returns once the first spawn succeeded or failed;
    /// supervision continues in the background.
    async fn run(&self, spec: ProcessSpec, on_started: FdCallback) -> Result<()>;

    /// Stop escorting and kill the helper. No-op when not escorting.
    async fn shutdown(&self);

    fn is_escorting(&self) -> bool;
}

/// Restart and fd hand-off policy
#[derive(Debug, Clone)]
pub struct EscortConfig {
    /// Restarts allowed after the first spawn
    pub max_restarts: u32,
    pub restart_delay: Duration,
    pub fd_handoff_delay: Duration,
}

impl Default for EscortConfig {
    fn default() -> Self {
        Self {
            max_restarts: 42,
            restart_delay: Duration::from_millis(500),
            fd_handoff_delay: Duration::from_secs(1),
        }
    }
}

/// Handle for the background supervision task
struct EscortHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Process-backed [`Supervisor`]
pub struct Escort {
    config: EscortConfig,
    escorting: Arc<AtomicBool>,
    handle: Mutex<Option<EscortHandle>>,
}

impl Escort {
    pub fn new(config: EscortConfig) -> Self {
        Self {
            config,
            escorting: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    fn spawn_child(spec: &ProcessSpec) -> Result<Child> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| EscortError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let name = spec
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "helper".to_string());

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(name.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(name, stderr));
        }

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!("Failed to write helper stdin: {}", e);
                }
                // stdin is closed when dropped here
            });
        }

        info!(
            "Spawned {} (pid {:?})",
            spec.program.display(),
            child.id()
        );
        Ok(child)
    }

    fn schedule_fd_handoff(
        delay: Duration,
        on_started: FdCallback,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let status = on_started();
                    if status != 0 {
                        warn!("Host fd hand-off returned status {}", status);
                    } else {
                        debug!("Capture fd handed to helper");
                    }
                }
                _ = stop_rx.changed() => {}
            }
        });
    }

    async fn supervise(
        config: EscortConfig,
        spec: ProcessSpec,
        mut child: Child,
        on_started: FdCallback,
        mut stop_rx: watch::Receiver<bool>,
        escorting: Arc<AtomicBool>,
    ) {
        let mut restarts_left = config.max_restarts;

        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => warn!("{} exited: {}", spec.program.display(), status),
                        Err(e) => error!("Failed to wait for {}: {}", spec.program.display(), e),
                    }

                    if restarts_left == 0 {
                        error!("{} exhausted its restarts, giving up", spec.program.display());
                        break;
                    }
                    restarts_left -= 1;

                    tokio::select! {
                        _ = tokio::time::sleep(config.restart_delay) => {}
                        _ = stop_rx.changed() => break,
                    }

                    info!(
                        "Restarting {} ({} restart(s) left)",
                        spec.program.display(),
                        restarts_left
                    );
                    child = match Self::spawn_child(&spec) {
                        Ok(child) => child,
                        Err(e) => {
                            error!("{}", e);
                            break;
                        }
                    };
                    Self::schedule_fd_handoff(
                        config.fd_handoff_delay,
                        on_started.clone(),
                        stop_rx.clone(),
                    );
                }
                _ = stop_rx.changed() => {
                    if let Err(e) = child.kill().await {
                        debug!("Kill {} failed: {}", spec.program.display(), e);
                    }
                    break;
                }
            }
        }

        escorting.store(false, Ordering::Release);
        debug!("Escort for {} finished", spec.program.display());
    }
}

impl Default for Escort {
    fn default() -> Self {
        Self::new(EscortConfig::default())
    }
}

#[async_trait]
impl Supervisor for Escort {
    async fn run(&self, spec: ProcessSpec, on_started: FdCallback) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if self.escorting.load(Ordering::Acquire) {
            return Err(EscortError::AlreadyEscorting);
        }
        if let Some(old) = handle.take() {
            // Finished on its own; reap it before starting over
            let _ = old.task.await;
        }

        info!("Escorting {} {:?}", spec.program.display(), spec.args);
        let child = Self::spawn_child(&spec)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        self.escorting.store(true, Ordering::Release);
        Self::schedule_fd_handoff(
            self.config.fd_handoff_delay,
            on_started.clone(),
            stop_rx.clone(),
        );

        let task = tokio::spawn(Self::supervise(
            self.config.clone(),
            spec,
            child,
            on_started,
            stop_rx,
            self.escorting.clone(),
        ));

        *handle = Some(EscortHandle { stop_tx, task });
        Ok(())
    }

    async fn shutdown(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };

        info!("Stopping helper escort");
        let _ = handle.stop_tx.send(true);
        if let Err(e) = handle.task.await {
            error!("Escort task panicked: {}", e);
        }
        self.escorting.store(false, Ordering::Release);
    }

    fn is_escorting(&self) -> bool {
        self.escorting.load(Ordering::Acquire)
    }
}

async fn forward_output<R>(name: String, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "tunpoint::helper", "[{}] {}", name, line);
    }
}
