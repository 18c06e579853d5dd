//! MCP Server Process Manager
//!
//! Spawns the server under test as a child process and supervises it:
//! readiness, output forwarding, lifecycle notifications and graceful
//! shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ─start─▶ Starting ─ready─▶ Ready ─stop─▶ Stopping ─▶ Stopped
//!                  │                 │
//!                  └─fail─▶ Failed ◀─┘ (non-zero exit)
//! ```
//!
//! A background monitor task owns the child. It reaps the process, publishes
//! its exit status, and notifies subscribers. The manager talks to it through
//! a kill request channel; dropping the manager kills the child.

use crate::error::{HarnessError, HarnessResult};
use crate::server::readiness::{LivenessReadiness, ProcessExit, ProcessWatch, ReadinessStrategy};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default startup budget
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default graceful shutdown budget
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5_000);

/// How long to wait for the child after a forced kill
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// How long to let output readers drain after the child exits
const OUTPUT_DRAIN_WAIT: Duration = Duration::from_millis(200);

/// Receives server output chunks (lossily decoded)
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Start/stop subscriber
pub type LifecycleCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Error subscriber
pub type ErrorCallback = Arc<dyn Fn(&HarnessError) -> anyhow::Result<()> + Send + Sync>;

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Server process configuration
#[derive(Clone)]
pub struct ServerManagerConfig {
    /// Executable to run
    pub command: String,

    pub args: Vec<String>,

    /// Extra environment; overrides inherited variables with the same name
    pub env: BTreeMap<String, String>,

    pub cwd: Option<PathBuf>,

    /// Exported to the child as `PORT` unless `env` already sets it
    pub port: Option<u16>,

    pub startup_timeout: Duration,

    pub shutdown_timeout: Duration,

    pub stdout: OutputSink,

    pub stderr: OutputSink,

    pub readiness: Arc<dyn ReadinessStrategy>,
}

impl ServerManagerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            port: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stdout: default_sink("stdout"),
            stderr: default_sink("stderr"),
            readiness: Arc::new(LivenessReadiness::new()),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn stdout_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stdout = Arc::new(sink);
        self
    }

    pub fn stderr_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stderr = Arc::new(sink);
        self
    }

    pub fn readiness<R>(mut self, strategy: R) -> Self
    where
        R: ReadinessStrategy + 'static,
    {
        self.readiness = Arc::new(strategy);
        self
    }
}

impl fmt::Debug for ServerManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerManagerConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("cwd", &self.cwd)
            .field("port", &self.port)
            .field("startup_timeout", &self.startup_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("readiness", &self.readiness.name())
            .finish()
    }
}

/// Default sinks log through tracing
fn default_sink(stream: &'static str) -> OutputSink {
    Arc::new(move |chunk: &str| {
        let chunk = chunk.trim_end();
        match stream {
            "stdout" => debug!(target: "mcp_harness::server::stdout", "{}", chunk),
            _ => debug!(target: "mcp_harness::server::stderr", "{}", chunk),
        }
    })
}

#[derive(Default)]
struct Subscribers {
    on_start: Vec<LifecycleCallback>,
    on_stop: Vec<LifecycleCallback>,
    on_error: Vec<ErrorCallback>,
}

/// State shared with the monitor task
struct Lifecycle {
    state: watch::Sender<ServerState>,
    subscribers: Mutex<Subscribers>,
}

impl Lifecycle {
    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: ServerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Server state changed");
        }
    }

    fn notify_start(&self) {
        let callbacks = self.subscribers().on_start.clone();
        run_lifecycle_callbacks("start", &callbacks);
    }

    fn notify_stop(&self) {
        let callbacks = self.subscribers().on_stop.clone();
        run_lifecycle_callbacks("stop", &callbacks);
    }

    fn notify_error(&self, err: &HarnessError) {
        let callbacks = self.subscribers().on_error.clone();
        for (index, callback) in callbacks.iter().enumerate() {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(err))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(index, error = %e, "Error subscriber failed"),
                Err(_) => error!(index, "Error subscriber panicked"),
            }
        }
    }

    /// Record a child exit observed by the monitor
    fn on_exit(&self, exit: ProcessExit) {
        let mut failed = false;
        self.state.send_modify(|state| {
            *state = match *state {
                ServerState::Ready if exit.is_failure() => {
                    failed = true;
                    ServerState::Failed
                }
                ServerState::Ready | ServerState::Stopping => ServerState::Stopped,
                // Starting is resolved by start() itself
                other => other,
            };
        });

        if failed {
            warn!(exit = %exit, "MCP server exited unexpectedly");
        } else {
            info!(exit = %exit, "MCP server exited");
        }

        self.notify_stop();

        if let Some(code) = exit.code.filter(|code| *code != 0) {
            let err = HarnessError::server_start(format!("Server process exited with code {}", code))
                .with_details(json!({"code": code}));
            self.notify_error(&err);
        }
    }
}

fn run_lifecycle_callbacks(event: &'static str, callbacks: &[LifecycleCallback]) {
    for (index, callback) in callbacks.iter().enumerate() {
        match std::panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(event, index, error = %e, "Lifecycle subscriber failed"),
            Err(_) => error!(event, index, "Lifecycle subscriber panicked"),
        }
    }
}

/// Handle to a spawned child
struct ChildHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    monitor: JoinHandle<()>,
    output_tasks: Vec<JoinHandle<()>>,
}

impl ChildHandle {
    fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    fn watch(&self) -> ProcessWatch {
        ProcessWatch::new(self.exit_rx.clone())
    }

    /// Ask the monitor to SIGKILL the child
    fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Ask the child to shut down gracefully
    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match self.pid.and_then(|pid| i32::try_from(pid).ok()) {
                Some(raw) => {
                    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                        warn!(pid = raw, error = %e, "Failed to send SIGTERM, killing instead");
                        self.kill();
                    }
                }
                None => self.kill(),
            }
        }

        #[cfg(not(unix))]
        self.kill();
    }

    async fn wait_exit(&self) -> ProcessExit {
        self.watch().exited().await
    }

    /// Let the output readers flush, then stop them
    async fn finish(self) {
        for task in self.output_tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(OUTPUT_DRAIN_WAIT, task).await.is_err() {
                abort.abort();
            }
        }
        if let Err(e) = self.monitor.await {
            if e.is_panic() {
                error!("Server monitor task panicked");
            }
        }
    }
}

/// Supervisor for one MCP server process
///
/// At most one child is live per manager. Lifecycle methods take `&mut self`,
/// so start/stop/restart cannot interleave.
///
/// # Example
///
/// ```ignore
/// let config = ServerManagerConfig::new("node")
///     .arg("dist/server.js")
///     .port(3000)
///     .startup_timeout(Duration::from_secs(5));
///
/// let mut server = McpServerManager::new(config);
/// server.start().await?;
/// assert!(server.is_running());
/// server.stop().await;
/// ```
pub struct McpServerManager {
    config: ServerManagerConfig,
    lifecycle: Arc<Lifecycle>,
    child: Option<ChildHandle>,
}

impl McpServerManager {
    pub fn new(config: ServerManagerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            config,
            lifecycle: Arc::new(Lifecycle {
                state,
                subscribers: Mutex::new(Subscribers::default()),
            }),
            child: None,
        }
    }

    pub fn config(&self) -> &ServerManagerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.lifecycle.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.lifecycle.state.subscribe()
    }

    /// Process id of the live child
    pub fn pid(&self) -> Option<u32> {
        self.child
            .as_ref()
            .filter(|child| child.exit_status().is_none())
            .and_then(|child| child.pid)
    }

    /// Whether the server is ready and its process has not exited
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Ready
            && self
                .child
                .as_ref()
                .is_some_and(|child| child.exit_status().is_none())
    }

    /// Register a callback run after the server becomes ready
    pub fn on_start<F>(&self, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle.subscribers().on_start.push(Arc::new(callback));
    }

    /// Register a callback run whenever the server process exits
    pub fn on_stop<F>(&self, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle.subscribers().on_stop.push(Arc::new(callback));
    }

    /// Register a callback run on spawn failure or non-zero exit
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&HarnessError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle.subscribers().on_error.push(Arc::new(callback));
    }

    /// Start the server and wait until it is ready
    ///
    /// A no-op if the server is already live.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ServerStart`] if the process cannot be spawned,
    /// or wrapping the readiness failure (premature exit or timeout). The
    /// process is stopped before the error is returned.
    pub async fn start(&mut self) -> HarnessResult<()> {
        if let Some(child) = &self.child {
            if child.exit_status().is_none() {
                debug!(pid = ?child.pid, "MCP server already running");
                return Ok(());
            }
            // Reap the handle of a process that exited on its own
            if let Some(stale) = self.child.take() {
                stale.finish().await;
            }
        }

        self.lifecycle.set_state(ServerState::Starting);
        info!(
            command = %self.config.command,
            args = ?self.config.args,
            readiness = self.config.readiness.name(),
            "Starting MCP server"
        );

        let child = match self.spawn_child() {
            Ok(child) => child,
            Err(err) => {
                error!(error = %err, "Failed to spawn MCP server");
                self.lifecycle.set_state(ServerState::Failed);
                self.lifecycle.notify_error(&err);
                return Err(err);
            }
        };
        self.child = Some(child);

        let ready = match self.wait_for_ready().await {
            Ok(()) => self.mark_ready(),
            Err(err) => Err(err),
        };

        match ready {
            Ok(()) => {
                info!(pid = ?self.pid(), "MCP server ready");
                self.lifecycle.notify_start();
                Ok(())
            }
            Err(cause) => {
                warn!(error = %cause, "MCP server failed to become ready");
                self.stop().await;
                self.lifecycle.set_state(ServerState::Failed);
                Err(HarnessError::server_start(format!(
                    "Failed to start MCP server: {}",
                    cause
                ))
                .with_details(json!({
                    "command": self.config.command,
                    "args": self.config.args,
                }))
                .with_cause(cause))
            }
        }
    }

    /// Wait until the configured readiness strategy passes
    ///
    /// Bounded by the startup timeout.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Timeout`] when the startup timeout elapses
    /// - [`HarnessError::ServerStart`] when the process exits first or none
    ///   was started
    pub async fn wait_for_ready(&self) -> HarnessResult<()> {
        let Some(child) = &self.child else {
            return Err(HarnessError::server_start("No server process has been started"));
        };

        let startup_timeout = self.config.startup_timeout;
        let mut watch = child.watch();
        let readiness = self
            .config
            .readiness
            .wait_until_ready(&mut watch, startup_timeout);

        match tokio::time::timeout(startup_timeout, readiness).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::timeout(format!(
                "Server did not become ready within {}ms",
                startup_timeout.as_millis()
            ))
            .with_details(json!({
                "timeout": startup_timeout.as_millis() as u64,
                "strategy": self.config.readiness.name(),
            }))),
        }
    }

    /// Stop the server
    ///
    /// Sends a graceful termination request, waits up to the shutdown
    /// timeout, then kills the process. Never fails; problems are logged.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!("No MCP server to stop");
            return;
        };

        if child.exit_status().is_none() {
            self.lifecycle.set_state(ServerState::Stopping);
            info!(pid = ?child.pid, "Stopping MCP server");

            child.terminate();
            let shutdown_timeout = self.config.shutdown_timeout;
            match tokio::time::timeout(shutdown_timeout, child.wait_exit()).await {
                Ok(exit) => debug!(exit = %exit, "MCP server stopped gracefully"),
                Err(_) => {
                    warn!(
                        pid = ?child.pid,
                        timeout_ms = shutdown_timeout.as_millis() as u64,
                        "MCP server ignored termination request, killing"
                    );
                    child.kill();
                    if tokio::time::timeout(FORCE_KILL_WAIT, child.wait_exit())
                        .await
                        .is_err()
                    {
                        error!(pid = ?child.pid, "MCP server did not exit after kill");
                    }
                }
            }
            self.lifecycle.set_state(ServerState::Stopped);
        }

        child.finish().await;
    }

    /// Stop, then start again
    pub async fn restart(&mut self) -> HarnessResult<()> {
        info!("Restarting MCP server");
        self.stop().await;
        self.start().await
    }

    fn spawn_child(&self) -> HarnessResult<ChildHandle> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(port) = self.config.port {
            if !self.config.env.contains_key("PORT") {
                command.env("PORT", port.to_string());
            }
        }
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            HarnessError::server_start(format!(
                "Failed to spawn server process '{}': {}",
                self.config.command, e
            ))
            .with_details(json!({
                "command": self.config.command,
                "args": self.config.args,
            }))
            .with_cause(e)
        })?;

        let pid = child.id();
        debug!(pid = ?pid, "Spawned MCP server process");

        let mut output_tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            output_tasks.push(tokio::spawn(forward_output(
                stdout,
                Arc::clone(&self.config.stdout),
                "stdout",
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            output_tasks.push(tokio::spawn(forward_output(
                stderr,
                Arc::clone(&self.config.stderr),
                "stderr",
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor = tokio::spawn(monitor_child(
            child,
            kill_rx,
            exit_tx,
            Arc::clone(&self.lifecycle),
        ));

        Ok(ChildHandle {
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
            monitor,
            output_tasks,
        })
    }

    /// Transition Starting -> Ready unless the child already exited
    fn mark_ready(&self) -> HarnessResult<()> {
        let Some(child) = &self.child else {
            return Err(HarnessError::server_start("Server process disappeared"));
        };

        let exit_rx = child.exit_rx.clone();
        let mut exited = None;
        self.lifecycle.state.send_if_modified(|state| {
            exited = *exit_rx.borrow();
            if exited.is_some() {
                return false;
            }
            *state = ServerState::Ready;
            true
        });

        match exited {
            Some(exit) => Err(HarnessError::server_start(format!(
                "Server process exited prematurely with {}",
                exit
            ))
            .with_details(json!({"code": exit.code, "signal": exit.signal}))),
            None => Ok(()),
        }
    }
}

impl Drop for McpServerManager {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if child.exit_status().is_none() {
                debug!(pid = ?child.pid, "Killing MCP server on drop");
            }
            child.kill();
        }
    }
}

impl fmt::Debug for McpServerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServerManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

/// Own the child until it exits or a kill is requested
///
/// A dropped kill sender counts as a kill request.
async fn monitor_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    lifecycle: Arc<Lifecycle>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Kill request for an already exited process");
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit::from(status),
        Err(e) => {
            warn!(error = %e, "Failed to reap MCP server process");
            ProcessExit::default()
        }
    };

    exit_tx.send_replace(Some(exit));
    lifecycle.on_exit(exit);
}

/// Forward a child output pipe to a sink until EOF
async fn forward_output<R>(mut reader: R, sink: OutputSink, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                if std::panic::catch_unwind(AssertUnwindSafe(|| sink(&chunk))).is_err() {
                    error!(stream, "Output sink panicked");
                }
            }
            Err(e) => {
                debug!(stream, error = %e, "Stopped reading server output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ServerManagerConfig::new("node")
            .arg("server.js")
            .args(["--verbose", "--stdio"])
            .env("LOG", "debug")
            .cwd("/tmp")
            .port(4000)
            .startup_timeout(Duration::from_millis(500))
            .shutdown_timeout(Duration::from_millis(250));

        assert_eq!(config.command, "node");
        assert_eq!(config.args, vec!["server.js", "--verbose", "--stdio"]);
        assert_eq!(config.env.get("LOG").map(String::as_str), Some("debug"));
        assert_eq!(config.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.port, Some(4000));
        assert_eq!(config.startup_timeout, Duration::from_millis(500));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.readiness.name(), "liveness");
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerManagerConfig::new("server");
        assert_eq!(config.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert!(format!("{:?}", config).contains("liveness"));
    }

    #[test]
    fn test_new_manager_is_idle() {
        let manager = McpServerManager::new(ServerManagerConfig::new("server"));
        assert_eq!(manager.state(), ServerState::Idle);
        assert!(!manager.is_running());
        assert!(manager.pid().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_ready_without_process() {
        let manager = McpServerManager::new(ServerManagerConfig::new("server"));
        let err = manager.wait_for_ready().await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ServerStart);
    }

    #[tokio::test]
    async fn test_stop_without_process_is_noop() {
        let mut manager = McpServerManager::new(ServerManagerConfig::new("server"));
        manager.stop().await;
        assert_eq!(manager.state(), ServerState::Idle);
    }

    #[test]
    fn test_subscriber_failures_are_contained() {
        let manager = McpServerManager::new(ServerManagerConfig::new("server"));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        manager.on_stop(|| anyhow::bail!("subscriber error"));
        manager.on_stop(|| panic!("subscriber panic"));
        let counter = Arc::clone(&calls);
        manager.on_stop(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        manager.lifecycle.notify_stop();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exit_transitions() {
        let manager = McpServerManager::new(ServerManagerConfig::new("server"));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        manager.on_error(move |err| {
            sink.lock().unwrap().push(err.message().to_string());
            Ok(())
        });

        manager.lifecycle.set_state(ServerState::Ready);
        manager.lifecycle.on_exit(ProcessExit {
            code: Some(0),
            signal: None,
        });
        assert_eq!(manager.state(), ServerState::Stopped);
        assert!(errors.lock().unwrap().is_empty());

        manager.lifecycle.set_state(ServerState::Ready);
        manager.lifecycle.on_exit(ProcessExit {
            code: Some(2),
            signal: None,
        });
        assert_eq!(manager.state(), ServerState::Failed);
        assert_eq!(
            errors.lock().unwrap().clone(),
            vec!["Server process exited with code 2".to_string()]
        );

        manager.lifecycle.set_state(ServerState::Ready);
        manager.lifecycle.on_exit(ProcessExit {
            code: None,
            signal: Some(9),
        });
        assert_eq!(manager.state(), ServerState::Stopped);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }
}
