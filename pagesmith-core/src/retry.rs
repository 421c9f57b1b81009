//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::Retryable;

/// How often and how patiently to repeat a transiently failing call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay, including server-requested ones.
    pub max_delay: Duration,
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f32(self.multiplier).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempt ceiling is reached. Returns the last error in the latter cases.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(attempt, error = %e, "{what} failed, retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let wait = e
                    .retry_after()
                    .map_or(delay, |requested| requested.max(delay))
                    .min(policy.max_delay);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "{what} failed, retrying in {wait:?}"
                );
                tokio::time::sleep(wait).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}
