//! Retry policy shared by the step invoker and the directory reader.
//!
//! A policy bounds the number of attempts and the wait between them. The
//! delay after the n-th failed attempt is
//! `backoff_interval * backoff_coefficient^(n - 1)`, capped at `max_backoff`.

use std::future::Future;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_common::error::AppError;

/// Attempts and backoff applied around a retryable operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub backoff_interval: Duration,
    /// Growth factor applied to the wait after each further failure.
    pub backoff_coefficient: f64,
    /// Upper bound for a single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_interval: Duration::from_secs(5),
            backoff_coefficient: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Constant wait between attempts.
    pub fn fixed(max_attempts: u32, backoff_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_interval,
            backoff_coefficient: 1.0,
            max_backoff: backoff_interval,
        }
    }

    /// Wait doubling (or scaling by `coefficient`) after every failure.
    pub fn exponential(
        max_attempts: u32,
        backoff_interval: Duration,
        coefficient: f64,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_interval,
            backoff_coefficient: coefficient.max(1.0),
            max_backoff,
        }
    }

    /// Single attempt, never retried.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Whole-activity policy from `ACTIVITY_*` settings.
    pub fn activity_from_config(config: &AppConfig) -> Self {
        Self::exponential(
            config.activity_max_attempts,
            Duration::from_millis(config.activity_backoff_ms),
            config.activity_backoff_coefficient,
            Duration::from_millis(config.activity_max_backoff_ms),
        )
    }

    /// Wait after `attempt` (1-indexed) has failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.backoff_interval.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let delay_ms = (base_ms * self.backoff_coefficient.powi(exponent)).min(max_ms);

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// An operation that failed on its final permitted attempt.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    #[source]
    pub last_error: AppError,
}

/// Run `op` until it succeeds, a non-retryable error occurs, or the policy
/// runs out of attempts.
pub async fn run_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(RetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }
        }
    }
}
