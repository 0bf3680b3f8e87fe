/// Exponential backoff retry utility for resilient operations
use crate::error::MailgraphError;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: 0.1,
        }
    }

    /// Calculates delay for a given attempt with exponential backoff and jitter
    ///
    /// Formula: min(base_delay * 2^attempt, max_delay) * (1 ± jitter)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));

        let capped_ms = exponential_ms.min(self.max_delay_ms);

        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
        let jittered_ms = (capped_ms as f64 * (1.0 + jitter)).max(0.0) as u64;

        Duration::from_millis(jittered_ms)
    }
}

/// Retries an async operation with exponential backoff
///
/// Rate-limited errors honor the provider-advised retry-after when present.
/// Permanent errors return immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> Result<T, MailgraphError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, MailgraphError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_retriable() {
                    warn!(
                        operation = operation_name,
                        error = %e,
                        "Permanent error, not retrying"
                    );
                    return Err(e);
                }

                if attempt >= config.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = config.max_retries,
                        error = %e,
                        "Max retries exhausted"
                    );
                    return Err(e);
                }

                let delay = match &e {
                    MailgraphError::RateLimited {
                        retry_after: Some(advised),
                        ..
                    } => *advised,
                    _ => config.calculate_delay(attempt),
                };

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retriable error, will retry after delay"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new(5, 1000, 60000);

        let delay0 = config.calculate_delay(0);
        assert!(delay0.as_millis() >= 900 && delay0.as_millis() <= 1100);

        let delay1 = config.calculate_delay(1);
        assert!(delay1.as_millis() >= 1800 && delay1.as_millis() <= 2200);

        let delay_high = config.calculate_delay(10);
        assert!(delay_high.as_millis() <= 66000);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            || {
                let c = counter_clone.clone();
                async move {
                    let count = c.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(MailgraphError::ProviderTransient("flaky".to_string()))
                    } else {
                        Ok::<i32, MailgraphError>(42)
                    }
                }
            },
            RetryConfig::new(5, 10, 1000),
            "test_op",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            || {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, MailgraphError>(MailgraphError::CredentialRevoked(
                        "invalid_grant".to_string(),
                    ))
                }
            },
            RetryConfig::new(5, 10, 1000),
            "test_op",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_honors_advised_retry_after() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let start = std::time::Instant::now();
        let result = retry_with_backoff(
            || {
                let c = counter_clone.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(MailgraphError::rate_limited(
                            "slow down",
                            Some(Duration::from_millis(50)),
                        ))
                    } else {
                        Ok::<i32, MailgraphError>(7)
                    }
                }
            },
            RetryConfig::new(3, 1000, 10_000),
            "test_op",
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        // Slept the advised 50ms, not the 1s backoff base
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
