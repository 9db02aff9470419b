//! Exponential backoff retry policy and the `retry` combinator.
//!
//! Defaults retry forever starting at 250ms and doubling, with no ceiling.
//! `max_backoff` and `max_retries` exist so a deployment can bound both.

use std::future::Future;
use std::time::Duration;

use crate::error::RpcError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Multiplier applied to the delay on each further retry.
    pub multiplier: f64,
    /// Ceiling for a single delay. `None` = unbounded growth.
    pub max_backoff: Option<Duration>,
    /// Maximum number of retries (not counting the first try). `None` = retry forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            multiplier: 2.0,
            max_backoff: None,
            max_retries: None,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` once `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.config.initial_backoff.as_secs_f64() * self.config.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        Some(match self.config.max_backoff {
            Some(cap) => delay.min(cap),
            None => delay,
        })
    }

    /// Returns `true` if a retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_retries.map_or(true, |max| attempt <= max)
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// Every failure is retried; the last error is returned once
/// [`RetryPolicy::next_delay`] yields `None`.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt = attempt.saturating_add(1);
                match policy.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            op = label,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(op = label, attempt, error = %e, "retries exhausted");
                        return Err(e);
                    }
                }
            }
        }
    }
}
