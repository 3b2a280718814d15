//! Bounded exponential-backoff retry for fallible async operations.
//!
//! A [`RetryPolicy`] makes one initial attempt plus up to `max_retries`
//! retries. After failed attempt `k` (0-indexed) it sleeps
//! `base_delay * 2^k` before the next one. Once the budget is spent the last
//! error is returned and nothing is retried again; recovery is left to
//! whatever triggers the operation next.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace, warn};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry (doubles on each subsequent retry)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(120_000);

/// Exponential-backoff retry policy
///
/// # Example
///
/// ```ignore
/// let policy = RetryPolicy::default();
/// let cert = policy
///     .run(Duration::from_secs(60), |attempt| issuer.issue(&domain, attempt))
///     .await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with `max_retries` retries after the first attempt
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay after the first failed attempt
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Total attempts the policy allows, first try included
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed)
    ///
    /// Saturates instead of overflowing for very large attempt numbers.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// The full sequence of delays between attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_after(attempt))
    }

    /// Run `operation` under this policy
    ///
    /// Sleeps `initial_delay` before the first attempt, then calls
    /// `operation(attempt)` until it succeeds or the attempt budget is spent.
    /// Returns the first success, or the error of the final attempt.
    pub async fn run<T, E, F, Fut>(&self, initial_delay: Duration, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if !initial_delay.is_zero() {
            debug!(
                initial_delay_secs = initial_delay.as_secs(),
                "Delaying first attempt"
            );
            tokio::time::sleep(initial_delay).await;
        }

        let mut attempt = 0;
        loop {
            trace!(attempt, max_retries = self.max_retries, "Starting attempt");

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        attempts = attempt + 1,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}
