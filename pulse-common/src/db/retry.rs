//! Retry policy for transient database failures
//!
//! Up to 3 attempts on transient errors (lock contention, pool timeouts,
//! connection resets), exponential backoff with jitter. Constraint
//! violations and logical errors fail immediately.

use crate::error::{Error, Result};
use rand::Rng;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 50;
const BACKOFF_FACTOR: u64 = 2;
const JITTER_FRACTION: f64 = 0.2;

fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY_MS * BACKOFF_FACTOR.pow(attempt.saturating_sub(1));
    let jitter_span = (base as f64 * JITTER_FRACTION) as i64;
    let jitter = if jitter_span > 0 {
        rand::thread_rng().gen_range(-jitter_span..=jitter_span)
    } else {
        0
    };
    Duration::from_millis((base as i64 + jitter).max(1) as u64)
}

/// Run `operation`, retrying transient failures with backoff.
pub async fn with_retry<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() || attempt >= MAX_ATTEMPTS {
                    if attempt > 1 {
                        tracing::error!(
                            operation = operation_name,
                            attempt,
                            error = %err,
                            "Operation failed after retries"
                        );
                    }
                    return Err(err);
                }

                let delay = backoff_delay(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = with_retry("test_op", || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);

        let result = with_retry("test_op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Database(sqlx::Error::PoolTimedOut)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_logical_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Validation("bad input".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        // Jitter is ±20%, so attempt 2's floor exceeds attempt 1's ceiling
        let d1 = backoff_delay(1);
        let d2 = backoff_delay(2);
        assert!(d1.as_millis() >= 40 && d1.as_millis() <= 60);
        assert!(d2.as_millis() >= 80 && d2.as_millis() <= 120);
    }
}
