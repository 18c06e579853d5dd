//! Async test helpers
//!
//! Bounded waits for conditions, polling, and stream collection. Every
//! helper is bounded by a timeout or an attempt budget and fails with
//! [`HarnessError::Timeout`] when the budget runs out.

use crate::error::{HarnessError, HarnessResult};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Options for [`wait_for_condition`]
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Overall budget (default: 5s)
    pub timeout: Duration,

    /// Pause between checks (default: 100ms)
    pub interval: Duration,

    /// Message of the timeout error
    pub message: String,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            interval: Duration::from_millis(100),
            message: "Condition not met within timeout".to_string(),
        }
    }
}

impl WaitOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Wait until `predicate` resolves to `true`
///
/// The predicate is checked immediately, then once per interval. A check in
/// progress when the timeout elapses is abandoned.
///
/// # Errors
///
/// [`HarnessError::Timeout`] with details `{timeout, interval}` in ms.
pub async fn wait_for_condition<F, Fut>(mut predicate: F, options: WaitOptions) -> HarnessResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let interval = options.interval;
    let checks = async {
        loop {
            if predicate().await {
                return;
            }
            sleep(interval).await;
        }
    };

    match tokio::time::timeout(options.timeout, checks).await {
        Ok(()) => Ok(()),
        Err(_) => Err(HarnessError::timeout(options.message).with_details(json!({
            "timeout": options.timeout.as_millis() as u64,
            "interval": options.interval.as_millis() as u64,
        }))),
    }
}

/// Options for [`poll_until`]
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Attempt budget (default: 10)
    pub max_attempts: usize,

    /// Pause between attempts (default: 100ms)
    pub interval: Duration,

    pub message: String,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(100),
            message: "Polling condition not met".to_string(),
        }
    }
}

impl PollOptions {
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Run `operation` until its value satisfies `predicate`
///
/// There is no pause after the final attempt. Errors from `operation` are
/// returned immediately.
///
/// # Errors
///
/// [`HarnessError::Timeout`] with details `{maxAttempts, interval, attempts}`
/// once the budget is exhausted.
pub async fn poll_until<T, F, Fut, P>(
    mut operation: F,
    predicate: P,
    options: PollOptions,
) -> HarnessResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    P: Fn(&T) -> bool,
{
    for attempt in 1..=options.max_attempts {
        let value = operation().await?;
        if predicate(&value) {
            debug!(attempt, "Polling condition met");
            return Ok(value);
        }
        if attempt < options.max_attempts {
            sleep(options.interval).await;
        }
    }

    Err(HarnessError::timeout(options.message).with_details(json!({
        "maxAttempts": options.max_attempts,
        "interval": options.interval.as_millis() as u64,
        "attempts": options.max_attempts,
    })))
}

/// Options for [`collect_stream_responses`]
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Overall budget (default: 5s)
    pub timeout: Duration,

    /// Stop after this many items
    pub max_items: Option<usize>,

    /// Fail instead of returning the partial collection (default: true)
    pub throw_on_timeout: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_items: None,
            throw_on_timeout: true,
        }
    }
}

impl CollectOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn throw_on_timeout(mut self, throw: bool) -> Self {
        self.throw_on_timeout = throw;
        self
    }
}

/// Collect items from a stream, bounded by time and count
///
/// Items are kept in arrival order. The stream is not polled again once
/// `max_items` is reached; the first stream error is returned as is.
///
/// # Errors
///
/// [`HarnessError::Timeout`] when the timeout elapses and `throw_on_timeout`
/// is set; the details carry the items collected so far.
pub async fn collect_stream_responses<S, T>(
    stream: S,
    options: CollectOptions,
) -> HarnessResult<Vec<T>>
where
    S: Stream<Item = HarnessResult<T>>,
    T: Serialize,
{
    let max_items = options.max_items.unwrap_or(usize::MAX);
    let mut items = Vec::new();
    if max_items == 0 {
        return Ok(items);
    }

    let deadline = sleep(options.timeout);
    tokio::pin!(deadline);
    tokio::pin!(stream);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                if options.throw_on_timeout {
                    let collected = serde_json::to_value(&items).unwrap_or_default();
                    return Err(HarnessError::timeout(format!(
                        "Stream did not complete within {}ms",
                        options.timeout.as_millis()
                    ))
                    .with_details(json!({
                        "timeout": options.timeout.as_millis() as u64,
                        "count": items.len(),
                        "items": collected,
                    })));
                }
                debug!(count = items.len(), "Stream collection timed out, returning partial items");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(item)) => {
                    items.push(item);
                    if items.len() >= max_items {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            },
        }
    }

    Ok(items)
}

/// Sleep for `duration`
pub async fn delay(duration: Duration) {
    sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_condition_third_check() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checks);

        let start = Instant::now();
        wait_for_condition(
            move || {
                let counter = Arc::clone(&counter);
                async move { counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
            },
            WaitOptions::default().interval(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_condition_times_out() {
        let err = wait_for_condition(
            || async { false },
            WaitOptions::default()
                .timeout(Duration::from_millis(300))
                .message("never"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.message(), "never");
        assert_eq!(err.details().unwrap()["timeout"], 300);
        assert_eq!(err.details().unwrap()["interval"], 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_condition_abandons_slow_check() {
        let start = Instant::now();
        let err = wait_for_condition(
            || async {
                sleep(Duration::from_secs(60)).await;
                true
            },
            WaitOptions::default().timeout(Duration::from_millis(500)),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_matching_value() {
        let attempts = AtomicUsize::new(0);
        let value = poll_until(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(n) }
            },
            |n| *n == 4,
            PollOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(value, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_exhausts_attempts_without_trailing_sleep() {
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();

        let err = poll_until(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n) }
            },
            |_| false,
            PollOptions::default()
                .max_attempts(3)
                .interval(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        let details = err.details().unwrap();
        assert_eq!(details["maxAttempts"], 3);
        assert_eq!(details["attempts"], 3);
        assert_eq!(details["interval"], 50);
    }

    #[tokio::test]
    async fn test_poll_until_propagates_operation_error() {
        let err = poll_until(
            || async { Err::<u32, _>(HarnessError::connection("refused")) },
            |_| true,
            PollOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Connection);
    }

    #[tokio::test]
    async fn test_collect_stops_at_max_items() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let stream = futures::stream::iter(1..=5).map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, HarnessError>(n)
        });

        let items = collect_stream_responses(stream, CollectOptions::default().max_items(3))
            .await
            .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collect_until_stream_ends() {
        let stream = futures::stream::iter(vec![Ok("a"), Ok("b")]);
        let items = collect_stream_responses(stream, CollectOptions::default())
            .await
            .unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_collect_returns_stream_error() {
        let stream = futures::stream::iter(vec![Ok(1), Err(HarnessError::tool_execution("boom"))]);
        let err = collect_stream_responses(stream, CollectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolExecution);
    }

    fn slow_stream() -> impl Stream<Item = HarnessResult<u32>> {
        futures::stream::iter(1..=10).then(|n| async move {
            sleep(Duration::from_millis(100)).await;
            Ok(n)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_timeout_throws_with_partial_items() {
        let err = collect_stream_responses(
            slow_stream(),
            CollectOptions::default().timeout(Duration::from_millis(250)),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        let details = err.details().unwrap();
        assert_eq!(details["count"], 2);
        assert_eq!(details["items"], json!([1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_timeout_returns_partial_items() {
        let items = collect_stream_responses(
            slow_stream(),
            CollectOptions::default()
                .timeout(Duration::from_millis(250))
                .throw_on_timeout(false),
        )
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_collect_zero_max_items() {
        let items = collect_stream_responses(
            futures::stream::iter(vec![Ok::<_, HarnessError>(1)]),
            CollectOptions::default().max_items(0),
        )
        .await
        .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay() {
        let start = Instant::now();
        delay(Duration::from_millis(75)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(75));
    }
}
