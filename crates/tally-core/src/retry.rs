//! Fixed-schedule retries with transient/terminal error classification.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classifies an error as worth retrying or terminal.
pub trait Retryable {
    /// Returns true if repeating the operation after a delay may succeed.
    fn is_retryable(&self) -> bool;
}

/// An ordered list of waits; its length is the number of attempts.
///
/// The wait at index `i` is slept after a retryable failure of attempt
/// `i + 1`, unless that attempt was the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetrySchedule {
    /// Creates a schedule from explicit waits.
    #[must_use]
    pub const fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Number of attempts. An empty schedule still runs the operation once.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    /// Returns the wait before attempt `attempt + 1`, or `None` if `attempt` was the last.
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt >= self.attempts() {
            return None;
        }
        self.delays.get(attempt - 1).copied()
    }

    /// Returns the configured waits.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Runs an operation against a [`RetrySchedule`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    schedule: RetrySchedule,
}

impl RetryExecutor {
    /// Creates an executor for the given schedule.
    #[must_use]
    pub const fn new(schedule: RetrySchedule) -> Self {
        Self { schedule }
    }

    /// Returns the schedule in use.
    #[must_use]
    pub const fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Invokes `op` until it succeeds, fails terminally, or the schedule runs out.
    ///
    /// On exhaustion the last observed error is returned. The caller owns the
    /// idempotency of `op`.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        self.execute_until(&CancellationToken::new(), op).await
    }

    /// Like [`RetryExecutor::execute`], but stops backing off once `cancel` fires.
    ///
    /// An attempt already in flight always completes. After cancellation no
    /// further attempt starts and the last error is returned.
    pub async fn execute_until<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(attempt, error = %err, "terminal failure, not retrying");
                return Err(err);
            }

            let Some(delay) = self.schedule.delay_after(attempt) else {
                warn!(attempt, error = %err, "retry schedule exhausted");
                return Err(err);
            };

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, backing off"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(attempt, "cancelled during backoff");
                    return Err(err);
                }
                () = sleep(delay) => {}
            }
        }
    }
}
