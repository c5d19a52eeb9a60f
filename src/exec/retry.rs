use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use log::warn;

/// Returns true when the error chain looks like upstream rate limiting
/// (HTTP 429-class responses or an explicit "rate limit" message).
/// Any other failure is not retryable.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let msg = cause.to_string().to_lowercase();
        msg.contains("rate limit") || msg.contains("too many requests") || msg.contains("429")
    })
}

/// Retry policy for idempotent operations against rate-limited upstreams.
///
/// Backoff is exponential with a 1 second base, doubling per attempt.
/// Failures that do not match the rate-limit predicate propagate immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or all
    /// attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_rate_limited(&err) {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err.context(format!(
                            "rate limit retries exhausted after {} attempts",
                            self.max_attempts
                        )));
                    }

                    let delay = self.base_delay * 2_u32.pow(attempt - 1);
                    warn!(
                        "Rate limited (attempt {}/{}), retrying in {:?}",
                        attempt, self.max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn non_rate_limit_errors_propagate_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = fast()
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("connection refused"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limited_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast()
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow::anyhow!("429 too many requests"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_the_rate_limit_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = fast()
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("rate limit exceeded"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("retries exhausted"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn predicate_matches_rate_limit_shapes() {
        assert!(is_rate_limited(&anyhow::anyhow!("HTTP 429")));
        assert!(is_rate_limited(&anyhow::anyhow!("Rate Limit hit")));
        assert!(!is_rate_limited(&anyhow::anyhow!("execution reverted")));
    }
}
