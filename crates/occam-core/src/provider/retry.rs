//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ProviderError;
use crate::metrics::METRICS;
use crate::obs;

/// Retry configuration for transient provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (values below 1 behave as 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that.
    pub backoff_base_ms: u64,
    /// Upper bound on any single delay.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Worth retrying: timeout, connection failure, 408/429/5xx.
    Retryable(String),
    /// Returned immediately without further attempts.
    Final(ProviderError),
}

/// Run `op` until it succeeds, fails with [`AttemptError::Final`], or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Final(err)) => return Err(err),
            Err(AttemptError::Retryable(message)) => {
                if attempt < max_attempts {
                    let delay = policy.delay_for(attempt);
                    METRICS.inc_provider_retries();
                    obs::emit_provider_retry(attempt, max_attempts, delay.as_millis() as u64, &message);
                    tokio::time::sleep(delay).await;
                }
                last_error = message;
            }
        }
    }

    Err(ProviderError::TransientExhausted {
        attempts: max_attempts,
        last_error,
    })
}
