//! Fixed-Delay Retry
//!
//! One retry helper shared by every remote call: identifier queries, article
//! fetches, and annotation fetches.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If failed and attempts remain: log WARN, sleep `delay`, retry
//! 4. If failed on the last attempt: return `RetryExhausted` with the last error
//!
//! There is no wall-clock budget, only the attempt cap: a consistently slow
//! source can hold a caller for `max_attempts × (call time + delay)`.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Attempt cap and inter-attempt delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (0 is treated as 1)
    pub max_attempts: u32,
    /// Sleep between consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

/// Every attempt failed
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E: fmt::Display + fmt::Debug> {
    pub operation: String,
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy's attempts run out
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "fetch article 31415926")
/// * `policy` - Attempt cap and delay
/// * `operation` - Closure producing a fresh future per attempt
pub async fn retry_with_delay<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display + fmt::Debug,
{
    let start_time = Instant::now();
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        error = %err,
                        "Operation failed: retries exhausted"
                    );
                    return Err(RetryExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: err,
                    });
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "Operation failed, retrying ({}/{})",
                    attempt,
                    max_attempts
                );

                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_with_delay("test_op", &fast(3), || async { Ok::<i32, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_with_delay("test_op", &fast(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("transient {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_keeps_last_error() {
        let calls = AtomicU32::new(0);

        let result = retry_with_delay("test_op", &fast(4), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<(), String>(format!("failure {}", n)) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "failure 4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.to_string().contains("test_op failed after 4 attempts"));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);

        let result = retry_with_delay("test_op", &fast(0), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), &str>("nope") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delay_applied_between_attempts_only() {
        let policy = RetryPolicy::new(3, Duration::from_millis(40));
        let start = Instant::now();

        let _ = retry_with_delay("test_op", &policy, || async { Err::<(), &str>("down") }).await;

        // Two sleeps for three attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1000), "elapsed {:?}", elapsed);
    }
}
