//! Server readiness strategies
//!
//! A strategy decides when a freshly spawned server may receive traffic. The
//! manager bounds every strategy by the configured startup timeout; a
//! strategy only has to watch for its own success condition and for the
//! process exiting early.

use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Upper bound on the liveness grace window
pub const DEFAULT_LIVENESS_GRACE: Duration = Duration::from_millis(1000);

/// How the server process exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, absent when the process was killed by a signal
    pub code: Option<i32>,

    /// Terminating signal (unix only)
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// A non-zero exit code
    pub fn is_failure(&self) -> bool {
        matches!(self.code, Some(code) if code != 0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Read side of the child's exit notification
#[derive(Debug, Clone)]
pub struct ProcessWatch {
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessWatch {
    pub fn new(exit_rx: watch::Receiver<Option<ProcessExit>>) -> Self {
        Self { exit_rx }
    }

    /// Exit status if the process already exited
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Wait for the process to exit
    ///
    /// If the monitor is gone without reporting, the exit is unknown.
    pub async fn exited(&mut self) -> ProcessExit {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or_default(),
            Err(_) => ProcessExit::default(),
        }
    }
}

fn premature_exit(exit: ProcessExit) -> HarnessError {
    HarnessError::server_start(format!(
        "Server process exited prematurely with {}",
        exit
    ))
    .with_details(json!({"code": exit.code, "signal": exit.signal}))
}

/// Strategy deciding when the server is ready
#[async_trait]
pub trait ReadinessStrategy: Send + Sync + fmt::Debug {
    /// Resolve once the server is ready
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ServerStart`] if the process exits first.
    async fn wait_until_ready(
        &self,
        process: &mut ProcessWatch,
        startup_timeout: Duration,
    ) -> HarnessResult<()>;

    /// Returns the name of the strategy (e.g., "liveness", "health")
    fn name(&self) -> &str;
}

/// Ready once the process has stayed alive for a short grace window
///
/// The window is the smaller of the startup timeout and one second.
#[derive(Debug, Clone)]
pub struct LivenessReadiness {
    max_grace: Duration,
}

impl LivenessReadiness {
    pub fn new() -> Self {
        Self {
            max_grace: DEFAULT_LIVENESS_GRACE,
        }
    }

    pub fn with_max_grace(mut self, grace: Duration) -> Self {
        self.max_grace = grace;
        self
    }

    pub fn grace_for(&self, startup_timeout: Duration) -> Duration {
        startup_timeout.min(self.max_grace)
    }
}

impl Default for LivenessReadiness {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessStrategy for LivenessReadiness {
    async fn wait_until_ready(
        &self,
        process: &mut ProcessWatch,
        startup_timeout: Duration,
    ) -> HarnessResult<()> {
        let grace = self.grace_for(startup_timeout);
        debug!(grace_ms = grace.as_millis() as u64, "Waiting for server liveness");

        if let Some(exit) = process.exit_status() {
            return Err(premature_exit(exit));
        }

        tokio::select! {
            exit = process.exited() => Err(premature_exit(exit)),
            _ = tokio::time::sleep(grace) => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "liveness"
    }
}

/// Ready once a health endpoint answers with a success status
#[derive(Debug, Clone)]
pub struct HealthEndpointReadiness {
    url: String,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl HealthEndpointReadiness {
    pub fn new(url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            url: url.into(),
            poll_interval,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> bool {
        // A probe never outlives one poll interval by much
        let probe_timeout = self.poll_interval.max(Duration::from_millis(250));
        match self
            .client
            .get(&self.url)
            .timeout(probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                trace!(url = %self.url, status = %response.status(), "Health probe answered");
                response.status().is_success()
            }
            Err(e) => {
                trace!(url = %self.url, error = %e, "Health probe failed");
                false
            }
        }
    }

    async fn poll(&self) {
        while !self.probe().await {
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl ReadinessStrategy for HealthEndpointReadiness {
    async fn wait_until_ready(
        &self,
        process: &mut ProcessWatch,
        _startup_timeout: Duration,
    ) -> HarnessResult<()> {
        debug!(url = %self.url, "Polling health endpoint");

        if let Some(exit) = process.exit_status() {
            return Err(premature_exit(exit));
        }

        tokio::select! {
            exit = process.exited() => Err(premature_exit(exit)),
            _ = self.poll() => {
                debug!(url = %self.url, "Health endpoint reports ready");
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "health"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tokio::time::Instant;

    fn channel() -> (watch::Sender<Option<ProcessExit>>, ProcessWatch) {
        let (tx, rx) = watch::channel(None);
        (tx, ProcessWatch::new(rx))
    }

    #[test]
    fn test_grace_is_capped() {
        let strategy = LivenessReadiness::new();
        assert_eq!(
            strategy.grace_for(Duration::from_millis(200)),
            Duration::from_millis(200)
        );
        assert_eq!(
            strategy.grace_for(Duration::from_secs(30)),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_process_exit_display() {
        let exit = ProcessExit {
            code: Some(3),
            signal: None,
        };
        assert!(exit.is_failure());
        assert_eq!(exit.to_string(), "code 3");

        let killed = ProcessExit {
            code: None,
            signal: Some(15),
        };
        assert!(!killed.is_failure());
        assert_eq!(killed.to_string(), "signal 15");
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_ready_after_grace() {
        let (_tx, mut process) = channel();
        let strategy = LivenessReadiness::new();

        let start = Instant::now();
        strategy
            .wait_until_ready(&mut process, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_fails_on_early_exit() {
        let (tx, mut process) = channel();
        let strategy = LivenessReadiness::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(Some(ProcessExit {
                code: Some(1),
                signal: None,
            }));
        });

        let err = strategy
            .wait_until_ready(&mut process, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServerStart);
        assert_eq!(err.details().unwrap()["code"], 1);
    }

    #[tokio::test]
    async fn test_liveness_fails_if_already_exited() {
        let (tx, mut process) = channel();
        tx.send(Some(ProcessExit::default())).unwrap();

        let err = LivenessReadiness::new()
            .wait_until_ready(&mut process, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServerStart);
    }

    #[tokio::test]
    async fn test_dropped_monitor_counts_as_exit() {
        let (tx, mut process) = channel();
        drop(tx);
        assert_eq!(process.exited().await, ProcessExit::default());
    }

    #[tokio::test]
    async fn test_health_fails_when_process_exits() {
        let (tx, mut process) = channel();
        // Nothing listens here
        let strategy =
            HealthEndpointReadiness::new("http://127.0.0.1:9/health", Duration::from_millis(20));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(Some(ProcessExit {
                code: Some(2),
                signal: None,
            }));
        });

        let err = strategy
            .wait_until_ready(&mut process, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServerStart);
        assert_eq!(strategy.name(), "health");
    }
}
