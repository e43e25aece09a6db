//! Per-remote token-bucket rate limiting (`spec.md` §4.6, §5 "Back-pressure").
//! Two independently configured buckets exist: a looser one for queries and
//! a stricter one for uploads.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::AppError;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self { tokens: capacity, capacity, refill_per_sec, last_refill: Instant::now() }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn seconds_until_token(&self) -> u64 {
        if self.refill_per_sec <= 0.0 {
            return 1;
        }
        let needed = (1.0 - self.tokens).max(0.0);
        (needed / self.refill_per_sec).ceil() as u64
    }
}

/// Header values surfaced on every rate-limited response.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    /// Configured per-window request limit.
    pub limit: u32,
    /// Tokens remaining after this request.
    pub remaining: u32,
    /// Seconds until the bucket is next full.
    pub reset_seconds: u64,
}

/// Per-remote-key token-bucket limiter enforcing `limit_per_minute` requests
/// per rolling minute.
pub struct RateLimiter {
    limit_per_minute: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Construct a limiter allowing `limit_per_minute` requests per key.
    pub fn new(limit_per_minute: u32) -> Self {
        Self { limit_per_minute, buckets: Mutex::new(HashMap::new()) }
    }

    /// Attempt to consume one token for `key` (typically a remote address).
    /// Returns `Ok` with the post-request bucket status, or `Err` with the
    /// retry-after duration when the bucket is empty.
    pub async fn check(&self, key: &str) -> Result<RateLimitStatus, AppError> {
        let capacity = self.limit_per_minute as f64;
        let refill_per_sec = capacity / 60.0;
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket::new(capacity, refill_per_sec));

        if bucket.try_take() {
            Ok(RateLimitStatus {
                limit: self.limit_per_minute,
                remaining: bucket.tokens.floor() as u32,
                reset_seconds: bucket.seconds_until_token(),
            })
        } else {
            Err(AppError::RateLimited { retry_after_secs: bucket.seconds_until_token().max(1) })
        }
    }

    /// Drop buckets untouched for longer than `idle_for`, bounding memory use.
    pub async fn prune(&self, idle_for: Duration) {
        let now = Instant::now();
        self.buckets.lock().await.retain(|_, bucket| now.duration_since(bucket.last_refill) < idle_for);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_up_to_the_limit() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check("client-a").await.is_ok());
        assert!(limiter.check("client-a").await.is_ok());
        let error = limiter.check("client-a").await.unwrap_err();
        assert!(matches!(error, AppError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn tracks_separate_buckets_per_key() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("client-a").await.is_ok());
        assert!(limiter.check("client-b").await.is_ok());
    }

    #[tokio::test]
    async fn prune_removes_idle_buckets() {
        let limiter = RateLimiter::new(5);
        limiter.check("client-a").await.unwrap();
        limiter.prune(Duration::from_secs(0)).await;
        assert!(limiter.buckets.lock().await.is_empty());
    }
}
