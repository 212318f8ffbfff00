use std::future::Future;
use std::time::Duration;

use primacy_core::{AppError, AppResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u8 = 3;
const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Fixed-delay retry settings for transient backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u8,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy; at least one attempt is always made.
    #[must_use]
    pub fn new(max_attempts: u8, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Returns the total number of attempts, first call included.
    #[must_use]
    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Returns the pause between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY)
    }
}

/// Runs `call` until it succeeds, fails non-transiently or attempts run out.
pub(crate) async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut call: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0_u8;

    loop {
        attempt = attempt.saturating_add(1);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(operation)),
            result = call() => result,
        };

        match result {
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "transient lock backend failure; retrying"
                );
            }
            other => return other,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(operation)),
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

pub(crate) fn cancelled(operation: &str) -> AppError {
    AppError::Cancelled(format!("{operation} was cancelled"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use primacy_core::{AppError, AppResult};
    use tokio_util::sync::CancellationToken;

    use super::{RetryPolicy, retry_transient};

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success_returns_value() -> AppResult<()> {
        let calls = AtomicUsize::new(0);
        let value = retry_transient(
            RetryPolicy::new(3, Duration::from_millis(100)),
            &CancellationToken::new(),
            "test call",
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::Transient("503".to_owned()))
                } else {
                    Ok(7)
                }
            },
        )
        .await?;

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = AtomicUsize::new(0);
        let result: AppResult<()> = retry_transient(
            RetryPolicy::new(3, Duration::from_millis(100)),
            &CancellationToken::new(),
            "test call",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Transient("503".to_owned()))
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: AppResult<()> = retry_transient(
            RetryPolicy::default(),
            &CancellationToken::new(),
            "test call",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Transport("400".to_owned()))
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_calling() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let result: AppResult<()> =
            retry_transient(RetryPolicy::default(), &cancel, "test call", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
