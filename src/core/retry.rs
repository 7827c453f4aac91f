//! Bounded retry with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::core::CollectorError;

/// Retry settings applied to every remote fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` total attempts and a fixed `delay`.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Run `operation` under this policy. `label` only feeds the logs.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::RetriesExhausted`] carrying the final error
    /// once every attempt has failed.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, CollectorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollectorError>>,
    {
        retry_labelled(label, operation, self.max_attempts, self.delay).await
    }
}

/// Call `operation` up to `max_attempts` times, sleeping `delay` between
/// failures.
///
/// A `max_attempts` of zero is treated as one attempt.
///
/// # Errors
///
/// Returns [`CollectorError::RetriesExhausted`] wrapping the last error.
pub async fn with_retry<T, F, Fut>(
    operation: F,
    max_attempts: u32,
    delay: Duration,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    retry_labelled("operation", operation, max_attempts, delay).await
}

async fn retry_labelled<T, F, Fut>(
    label: &str,
    mut operation: F,
    max_attempts: u32,
    delay: Duration,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(label, attempt, max_attempts, "attempt");
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                warn!(label, attempts = attempt, error = %err, "giving up");
                return Err(CollectorError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                warn!(label, attempt, max_attempts, error = %err, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
