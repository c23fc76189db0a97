//! Time budgets and retries for asynchronous operations.

use crate::config::RetryConfig;
use crate::error::{CoreError, CoreResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// A countdown shared by all the steps of one operation.
///
/// Every nested step runs with whatever budget remains, so a slow step
/// eats into the same overall timeout as the steps after it.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutTimer {
    deadline: Instant,
}

impl TimeoutTimer {
    /// Starts a countdown of `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now
                .checked_add(timeout)
                .unwrap_or_else(|| now + Duration::from_secs(86400 * 365)),
        }
    }

    /// Returns the remaining budget, or zero if it is exhausted.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns whether the budget is exhausted.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Runs `future` within the remaining budget.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` naming `operation` if the budget runs out first;
    /// otherwise the future's own result, converted into a core error.
    pub async fn run<T, E, F>(&self, operation: &str, future: F) -> CoreResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<CoreError>,
    {
        match tokio::time::timeout(self.remaining(), future).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(CoreError::timeout(operation)),
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry` rejects,
/// or `config.max_attempts` attempts have been made.
///
/// Backoff delays never extend past the timer's budget: if the next delay
/// would, the last error is returned as a timeout.
///
/// # Errors
///
/// Returns the last error produced by `op`, or `Timeout` if the budget ran
/// out while waiting to retry.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    timer: &TimeoutTimer,
    trace_id: &str,
    operation: &str,
    should_retry: fn(&CoreError) -> bool,
    mut op: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) && attempt + 1 < config.max_attempts => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                if delay >= timer.remaining() {
                    return Err(CoreError::timeout(operation));
                }

                debug!(
                    "{}: Retrying {} (attempt {}, delay {:?}): {}",
                    trace_id, operation, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
