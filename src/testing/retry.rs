//! Retry with optional exponential backoff
//!
//! Retries an async operation a bounded number of times. Between attempts
//! the delay is either constant or doubles with each failure:
//! `interval * 2^(attempt - 1)`.
//!
//! # Example
//!
//! ```ignore
//! use mcp_harness::testing::{retry, RetryOptions};
//!
//! let options = RetryOptions::new()
//!     .max_attempts(5)
//!     .interval(Duration::from_millis(50))
//!     .backoff(true);
//!
//! let tools = retry(&options, || async { client.get_schema().await }).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
///
/// # Fields
///
/// * `max_attempts` - Total attempts, including the first (default: 3)
/// * `interval` - Delay after the first failure (default: 100ms)
/// * `backoff` - Double the delay after every further failure (default: off)
/// * `max_delay` - Optional cap on a single delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    pub max_attempts: usize,
    pub interval: Duration,
    pub backoff: bool,
    pub max_delay: Option<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(100),
            backoff: false,
            max_delay: None,
        }
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of attempts
    ///
    /// Zero is treated as one: the operation always runs at least once.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn backoff(mut self, backoff: bool) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let delay = if self.backoff {
            let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
            2_u32
                .checked_pow(exponent)
                .and_then(|factor| self.interval.checked_mul(factor))
                .unwrap_or(Duration::MAX)
        } else {
            self.interval
        };

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Retry an operation until it succeeds or attempts run out
///
/// # Returns
///
/// The first success, or the error of the final attempt, unchanged.
pub async fn retry<F, Fut, T, E>(options: &RetryOptions, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after {} retries", attempt - 1);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts => {
                let delay = options.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed: {}, retrying",
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::debug!(attempts = attempt, "Operation failed on every attempt: {}", e);
                return Err(e);
            }
        }
    }
}
