//! Bounded retry with exponential backoff
//!
//! Only transient protocol failures are retried. Permanent failures such as an
//! unsupported route are returned on the first attempt.

use crate::config::{MonitorConfig, RetryConfig};
use crate::error::ProtocolError;

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for protocol calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ProtocolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProtocolError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {} - retrying in {:?}",
                        operation, attempt, self.max_attempts, e, delay
                    );
                    crate::metrics::record_protocol_retry(operation);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Increasing-delay poll schedule: each delay is the previous one times `factor`, capped
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            factor,
            max,
        }
    }

    /// Schedule of the main status poll loop
    pub fn status_polls(config: &MonitorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_factor,
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Schedule of the recovery poll loop: longer base delay, same shape
    pub fn recovery_polls(config: &MonitorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.recovery_initial_delay_ms),
            config.backoff_factor,
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        let scaled = Duration::from_millis((current.as_millis() as f64 * self.factor) as u64);
        self.next = scaled.min(self.max);
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = Backoff::new(
            Duration::from_millis(5_000),
            1.5,
            Duration::from_millis(10_000),
        );
        assert_eq!(backoff.next_delay(), Duration::from_millis(5_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(7_500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("transfer_fee", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ProtocolError::Transient("503".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("transfer_fee", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProtocolError::UnsupportedRoute("ethereum -> solana".into())) }
            })
            .await;
        assert!(matches!(result, Err(ProtocolError::UnsupportedRoute(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("gas_estimate", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProtocolError::Transient("timeout".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
