use super::client::CallError;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Bounded exponential backoff: attempt `n` (0-based) is followed by a sleep
/// of `base_delay * 2^n` when it fails transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Sleeps between attempts; one fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.base_delay;
        (0..self.max_attempts.saturating_sub(1)).map(move |i| base.saturating_mul(1u32 << i.min(31)))
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy runs out of attempts. The closure receives the 1-based attempt
/// number.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, CallError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let attempt = AtomicU32::new(0);
    let max_attempts = policy.max_attempts.max(1);

    RetryIf::spawn(
        policy.delays(),
        || operation(attempt.fetch_add(1, Ordering::SeqCst) + 1),
        |e: &CallError| {
            if !e.is_transient() {
                return false;
            }
            let made = attempt.load(Ordering::SeqCst);
            if made < max_attempts {
                warn!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    made, max_attempts, e
                );
            }
            true
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn test_default_delays_double() {
        let delays: Vec<_> = RetryPolicy::default().delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).delays().count(), 0);
        assert_eq!(RetryPolicy::new(1, Duration::from_secs(1)).delays().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts_with_backoff() {
        let started = Instant::now();
        let timestamps = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), CallError> = retry_transient(RetryPolicy::default(), |_| {
            let timestamps = timestamps.clone();
            async move {
                timestamps.lock().unwrap().push(started.elapsed());
                Err(CallError::Connection("connection refused".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(CallError::Connection(_))));
        assert_eq!(
            *timestamps.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(6)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_is_not_retried() {
        let calls = Arc::new(Mutex::new(0));

        let result: Result<(), CallError> = retry_transient(RetryPolicy::default(), |_| {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Err(CallError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(CallError::Status { status: 500, .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let result = retry_transient(RetryPolicy::default(), |attempt| async move {
            if attempt < 2 {
                Err(CallError::Connection("reset".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }
}
