//! Retry for connection-class store failures.
//!
//! Business errors are never retried; unique violations are idempotency
//! signals and must surface immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Exponential backoff policy for transient failures.
#[derive(Debug, Copy, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `op`, retrying only [`StoreError::Connection`] failures, up to
/// `policy.max_attempts` total attempts. The cancellation token is honored
/// between attempts and during backoff sleeps.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Canceled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, error = %err, "transient store failure, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_connection_errors_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_transient(RetryPolicy::default(), &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Connection("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_class_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_transient(RetryPolicy::default(), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StoreError::UniqueViolation {
                    constraint: "ux_x".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };

        let result: Result<(), _> = retry_transient(policy, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Connection("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry_transient(RetryPolicy::default(), &cancel, || async {
            panic!("op must not run after cancellation")
        })
        .await;

        assert!(matches!(result, Err(StoreError::Canceled)));
    }
}
