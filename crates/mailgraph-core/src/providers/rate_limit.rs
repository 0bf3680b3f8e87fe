//! Per-(user, provider) token-bucket rate limiting.
//!
//! Buckets are in-memory and advisory; providers remain the authority on
//! their own quotas. A request that would overdraw the bucket blocks up to
//! an acquire timeout, then surfaces `RateLimited` with a suggested
//! retry-after.

use crate::constants::RATE_LIMIT_ACQUIRE_TIMEOUT_SECONDS;
use crate::error::MailgraphError;
use crate::providers::ProviderKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes `cost` tokens or reports how long until they are available
    fn try_take(&mut self, cost: f64, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_second))
        }
    }
}

pub struct RateLimiterRegistry {
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    burst: f64,
    acquire_timeout: Duration,
}

impl RateLimiterRegistry {
    pub fn new(burst: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            burst,
            acquire_timeout: Duration::from_secs(RATE_LIMIT_ACQUIRE_TIMEOUT_SECONDS),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    async fn bucket(&self, user_id: &str, provider: ProviderKind) -> Arc<Mutex<TokenBucket>> {
        let key = format!("{}/{}", user_id, provider.as_str());
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.burst.max(provider.rate_per_second()),
                    provider.rate_per_second(),
                )))
            })
            .clone()
    }

    /// Blocks until `cost` tokens are available or the acquire timeout
    /// elapses
    pub async fn acquire(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cost: f64,
    ) -> Result<(), MailgraphError> {
        let bucket = self.bucket(user_id, provider).await;
        let deadline = Instant::now() + self.acquire_timeout;

        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                match bucket.try_take(cost, Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            if Instant::now() + wait > deadline {
                warn!(
                    user_id = %user_id,
                    provider = %provider.as_str(),
                    cost = cost,
                    wait_ms = wait.as_millis(),
                    "Rate limit acquire timed out"
                );
                return Err(MailgraphError::rate_limited(
                    format!(
                        "{} bucket exhausted for user {}",
                        provider.as_str(),
                        user_id
                    ),
                    Some(wait),
                ));
            }

            tokio::time::sleep(wait.min(Duration::from_millis(250))).await;
        }
    }
}
