//! Reusable retry policy shared by every remote call site.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Attempt ceiling, exponential backoff and per-call timeout.
///
/// The retryable predicate is [`SyncError::is_retryable`]; network-class
/// errors additionally fire the failover hook, at most once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay,
            factor: config.retry_factor,
            call_timeout: config.call_timeout,
        }
    }

    /// Backoff before retrying after the `attempt`-th charged failure:
    /// `base × factor^(attempt − 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.factor.powi(exponent))
    }

    /// Runs `op` until it succeeds, fails fatally or the budget is spent.
    ///
    /// Each attempt races `call_timeout`; an elapsed timer counts as a
    /// network-class error. The first network-class error calls `on_failover`
    /// and retries immediately without charging the attempt counter.
    pub async fn run<T, F, Fut, H>(&self, mut op: F, mut on_failover: H) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnMut(&SyncError),
    {
        let mut charged = 0u32;
        let mut failed_over = false;

        loop {
            let err = match timeout(self.call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => SyncError::Timeout(self.call_timeout),
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if err.is_network() && !failed_over {
                failed_over = true;
                on_failover(&err);
                continue;
            }

            charged += 1;
            if charged >= self.max_attempts {
                warn!(attempts = charged, error = %err, "retry budget exhausted");
                return Err(SyncError::Exhausted {
                    attempts: charged,
                    last: err.to_string(),
                });
            }

            let delay = self.delay_for(charged);
            debug!(attempt = charged, ?delay, error = %err, "retrying remote call");
            sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            factor: 1.5,
            call_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_backoff_grows_by_factor() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(150));
        assert_eq!(policy.delay_for(3), Duration::from_millis(225));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = policy()
            .run(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(SyncError::Fatal("not found".to_string())) }
                },
                |_| {},
            )
            .await;

        assert!(matches!(result, Err(SyncError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_fires_once_and_is_free() {
        let calls = Arc::new(AtomicU32::new(0));
        let failovers = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let hook = failovers.clone();

        let result: Result<()> = policy()
            .run(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(SyncError::Transient("connection reset".to_string())) }
                },
                |_| {
                    hook.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(matches!(result, Err(SyncError::Exhausted { attempts: 5, .. })));
        assert_eq!(failovers.load(Ordering::SeqCst), 1);
        // One uncharged failover attempt plus five charged ones
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = policy()
            .run(
                || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(SyncError::Remote {
                                status: 400,
                                message: "busy".to_string(),
                            })
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| panic!("non-network errors must not fail over"),
            )
            .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_network_error() {
        let policy = RetryPolicy {
            max_attempts: 1,
            call_timeout: Duration::from_millis(50),
            ..policy()
        };
        let failovers = Arc::new(AtomicU32::new(0));
        let hook = failovers.clone();

        let result: Result<()> = policy
            .run(
                || async {
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                |err| {
                    assert!(matches!(err, SyncError::Timeout(_)));
                    hook.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(matches!(result, Err(SyncError::Exhausted { attempts: 1, .. })));
        assert_eq!(failovers.load(Ordering::SeqCst), 1);
    }
}
