//! Generic retry/backoff policy for side-effecting remote calls.
//!
//! The policy knows nothing about what it retries. Errors describe themselves through
//! [`Retryable`], and [`RetryPolicy::run`] re-invokes the operation according to that class:
//! transient failures consume an attempt and wait `delay`, rate limiting waits
//! `rate_limit_delay` without consuming an attempt, and fatal failures return immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How a failed attempt should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Network blip or server-side hiccup; retry after the standard delay.
    Transient,
    /// The remote service asked us to slow down; wait longer and retry.
    RateLimited,
    /// Retrying cannot help.
    Fatal,
}

/// Errors that can be classified for retrying.
pub trait Retryable {
    /// Classify this error for the retry loop.
    fn retry_class(&self) -> RetryClass;
}

/// Bounded retry with fixed backoff and a separate rate-limit pause.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed for transient failures (including the first).
    pub max_attempts: u32,
    /// Pause between transient retries.
    pub delay: Duration,
    /// Pause after a rate-limit signal.
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits; handy for tests and local backends.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
        }
    }

    /// Run `operation`, retrying according to the error classification.
    ///
    /// Returns the first success, the first fatal error, or the transient error that exhausted
    /// the attempt budget.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match error.retry_class() {
                RetryClass::Fatal => return Err(error),
                RetryClass::RateLimited => {
                    tracing::warn!(
                        operation = label,
                        wait_secs = self.rate_limit_delay.as_secs(),
                        error = %error,
                        "Rate limited; backing off"
                    );
                    tokio::time::sleep(self.rate_limit_delay).await;
                }
                RetryClass::Transient if attempt >= max_attempts => {
                    tracing::error!(
                        operation = label,
                        attempts = attempt,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(error);
                }
                RetryClass::Transient => {
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Transient failure; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
