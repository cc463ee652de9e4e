//! Bounded timeout + exponential backoff around broker calls.

use std::future::Future;
use std::time::Duration;

use tg_config::BrokerConfig;

use crate::broker::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always >= 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self {
            max_attempts: cfg.retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.retry.max_backoff_ms),
            timeout: cfg.request_timeout(),
        }
    }

    /// One attempt, no backoff.
    pub fn single(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            timeout,
        }
    }

    /// Delay before attempt `attempt + 1` (attempt counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Run `fut` under `timeout`; an elapsed deadline is [`BrokerError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(BrokerError::Timeout(timeout)),
    }
}

/// Call `f` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Returns the last error.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    mut f: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut attempt = 1;
    loop {
        match with_timeout(policy.timeout, f()).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    op,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "broker call failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
