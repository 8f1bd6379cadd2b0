use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Bounded retry with exponential backoff and no jitter.
///
/// An operation is attempted `max_retries + 1` times. The delay before retry
/// `k` (1-based) is `min(initial_delay * backoff_factor^(k-1), max_delay)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay slept before retry number `retry` (the first retry is 1).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// The full backoff schedule, one entry per retry.
    pub fn delays(&self) -> BackoffDelays {
        BackoffDelays {
            policy: self.clone(),
            next_retry: 1,
        }
    }

    /// Runs `operation` until it succeeds, fails with an error that is not
    /// retryable, or the retry budget is spent.
    ///
    /// The error of the final attempt is returned unchanged.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.max_retries;
        let total_attempts = self.total_attempts();
        let mut attempt: u32 = 0;

        let action = || {
            attempt += 1;
            let current = attempt;
            let next_delay = (current <= max_retries).then(|| self.delay_for_retry(current));
            let fut = operation();

            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        match next_delay {
                            Some(delay) if e.is_retryable() => warn!(
                                "Operation failed (attempt {}/{}): {}. Retrying in {:.2} seconds...",
                                current,
                                total_attempts,
                                e,
                                delay.as_secs_f64()
                            ),
                            Some(_) => error!("Operation failed with a non-retryable error: {}", e),
                            None => error!(
                                "Operation failed after {} retries: {}",
                                max_retries, e
                            ),
                        }
                        Err(e)
                    }
                }
            }
        };

        RetryIf::start(self.delays(), action, |e: &Error| e.is_retryable()).await
    }
}

/// Iterator over the delays of a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffDelays {
    policy: RetryPolicy,
    next_retry: u32,
}

impl Iterator for BackoffDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next_retry > self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for_retry(self.next_retry);
        self.next_retry += 1;
        Some(delay)
    }
}
