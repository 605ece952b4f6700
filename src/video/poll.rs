//! Fixed-interval polling.

use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a long-running operation is polled.
///
/// The default polls every 15 seconds with no attempt or time limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between two status requests.
    pub interval: Duration,
    /// Give up after this many status requests.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first request.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_attempts: None,
            timeout: None,
        }
    }
}

impl PollPolicy {
    /// Sets the wait between status requests.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Limits the number of status requests.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Limits the total time spent polling.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Calls `check` once per interval until it yields a value.
///
/// `check` receives the 1-based attempt number and returns `Ok(None)` while
/// the operation is still pending. Errors from `check` end the loop
/// immediately. Exhausting the attempt or time budget gives
/// [`PipelineError::Timeout`]; firing `cancel` gives
/// [`PipelineError::Cancelled`].
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(timeout) = policy.timeout {
            if start.elapsed() > timeout {
                return Err(PipelineError::Timeout(timeout));
            }
        }

        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = check(attempt) => outcome?,
        };
        if let Some(value) = outcome {
            return Ok(value);
        }

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(PipelineError::Timeout(start.elapsed()));
        }

        tracing::debug!(
            attempt,
            elapsed_secs = start.elapsed().as_secs(),
            next_in_secs = policy.interval.as_secs(),
            "operation still pending"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
