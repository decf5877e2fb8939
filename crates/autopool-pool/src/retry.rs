//! Bounded exponential backoff for provisioning calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use autopool_core::{BackendError, PoolConfig, PoolError};

/// How many times, and how patiently, a backend call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.provisioning_attempts,
            Duration::from_millis(config.provisioning_backoff_ms),
        )
    }

    /// Delay after the given failed attempt (1-based): base, 2×base, 4×base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        (self.base_delay * factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, fails non-retryably, or runs out of attempts.
///
/// Exhaustion and fatal errors both surface as `ProvisioningFailure`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, PoolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "backend call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.retryable && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "backend call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(PoolError::ProvisioningFailure {
                    attempts: attempt,
                    reason: e.message,
                });
            }
        }
    }
}
