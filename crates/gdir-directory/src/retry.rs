use std::future::Future;
use std::time::Duration;

use gdir_types::DirectoryError;

/// How often, and how patiently, a failed call is attempted again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    NoRetry,
    /// Exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
    Backoff {
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn backoff(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy::Backoff { max_retries, base_delay, max_delay }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::NoRetry => 0,
            RetryPolicy::Backoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::NoRetry => Duration::ZERO,
            RetryPolicy::Backoff { base_delay, max_delay, .. } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base_delay.checked_mul(factor).map_or(*max_delay, |d| d.min(*max_delay))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::backoff(3, Duration::from_millis(20), Duration::from_millis(500))
    }
}

/// Runs `f` until it succeeds, fails permanently, or the policy's budget
/// runs out. Exhausted transient failures come back as `Unavailable`.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut f: F,
) -> Result<T, DirectoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DirectoryError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_retries() => {
                let delay = policy.retry_delay(attempt);
                tracing::warn!(op, attempt, error = %e, ?delay, "directory store call failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(DirectoryError::Unavailable(format!("{op}: {e}")));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let p = RetryPolicy::backoff(10, Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(p.retry_delay(0), Duration::from_millis(10));
        assert_eq!(p.retry_delay(1), Duration::from_millis(20));
        assert_eq!(p.retry_delay(2), Duration::from_millis(40));
        assert_eq!(p.retry_delay(3), Duration::from_millis(50));
        assert_eq!(p.retry_delay(40), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::backoff(2, Duration::from_millis(1), Duration::from_millis(2));
        let result = with_retry(&policy, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DirectoryError::Storage("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_unavailable() {
        let policy = RetryPolicy::backoff(1, Duration::from_millis(1), Duration::from_millis(1));
        let result: Result<(), _> =
            with_retry(&policy, "find", || async { Err(DirectoryError::Timeout) }).await;
        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn invalid_argument_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "insert", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DirectoryError::InvalidArgument("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(DirectoryError::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
