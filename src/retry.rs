//! Retry policy for the aggregation façade's query path.
//!
//! Ingest-side `Transient` errors are handed back to the caller for
//! retry-safe handling (the caller owns the event, so it can simply resend
//! it). Query-side `Transient` errors have no such natural retry point on
//! the caller's side, so the façade retries them itself: exponential backoff
//! with jitter, bounded by [`EngineConfig::max_retry_attempts`].

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

#[cfg(test)]
use crate::error::EngineError;
use crate::error::Result;

const INITIAL_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_millis(500);
const MULTIPLIER: f64 = 2.0;

/// A bounded exponential-backoff-with-jitter retry policy for `Transient`
/// storage errors encountered while answering a query.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Builds a policy that retries up to `max_attempts` times after the
    /// initial attempt.
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy { max_attempts }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = INITIAL_DELAY.as_millis() as f64 * MULTIPLIER.powi(attempt as i32);
        let jitter = rand::rng().random::<f64>() * base_ms;
        Duration::from_millis((base_ms + jitter) as u64).min(MAX_DELAY)
    }

    /// Runs `op`, retrying on [`EngineError::Transient`] until it succeeds,
    /// returns a non-retryable error, or exhausts `max_attempts`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_success() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, EngineError>(42)
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(EngineError::Transient("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2);
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Transient("still down".into()))
            })
            .await;
        assert!(result.is_err());
        // initial attempt + 2 retries = 3 total calls
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let policy = RetryPolicy::new(5);
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::NotFound("no such key".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
