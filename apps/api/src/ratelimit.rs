//! Store-backed rate limiter.
//!
//! Fixed window per subject key. Counters live behind `RateLimitStore` so
//! multi-process deployments share one Redis-backed view instead of
//! per-process dictionaries; tests use the in-memory store with a manual
//! clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::clock::Clock;
use crate::errors::AppError;

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increments the counter for a window-scoped key and returns the new
    /// count. `ttl_secs` bounds the key's lifetime in shared stores.
    async fn increment(&self, key: &str, ttl_secs: u64) -> anyhow::Result<u64>;
}

/// Redis-backed store shared across server processes.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn increment(&self, key: &str, ttl_secs: u64) -> anyhow::Result<u64> {
        use redis::AsyncCommands;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: u64 = conn.incr(key, 1u64).await?;
        if count == 1 {
            let _: i64 = conn.expire(key, ttl_secs as i64).await?;
        }
        Ok(count)
    }
}

/// In-process store for tests and single-process setups. Keys are already
/// window-scoped, so expiry is not modeled.
#[derive(Default)]
pub struct MemoryStore {
    counts: Mutex<HashMap<String, u64>>,
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, key: &str, _ttl_secs: u64) -> anyhow::Result<u64> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    max_requests: u64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        max_requests: u64,
        window_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            max_requests,
            window_secs,
        }
    }

    /// Admits or rejects one request for `subject` in the current window.
    pub async fn check(&self, subject: &str) -> Result<(), AppError> {
        let now = self.clock.now().timestamp();
        let window_start = now - now.rem_euclid(self.window_secs as i64);
        let key = format!("ratelimit:{subject}:{window_start}");

        let count = self
            .store
            .increment(&key, self.window_secs * 2)
            .await
            .map_err(AppError::Internal)?;

        if count > self.max_requests {
            tracing::warn!(subject, count, "rate limit exceeded");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn make_limiter(max_requests: u64, window_secs: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::default()),
            clock.clone(),
            max_requests,
            window_secs,
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_admits_up_to_limit() {
        let (limiter, _clock) = make_limiter(2, 60);
        assert!(limiter.check("user-a").await.is_ok());
        assert!(limiter.check("user-a").await.is_ok());
        assert!(matches!(
            limiter.check("user-a").await,
            Err(AppError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn test_window_rolls_over() {
        let (limiter, clock) = make_limiter(1, 60);
        assert!(limiter.check("user-a").await.is_ok());
        assert!(limiter.check("user-a").await.is_err());

        clock.advance(Duration::seconds(61));
        assert!(limiter.check("user-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let (limiter, _clock) = make_limiter(1, 60);
        assert!(limiter.check("user-a").await.is_ok());
        assert!(limiter.check("user-b").await.is_ok());
        assert!(limiter.check("user-a").await.is_err());
        assert!(limiter.check("user-b").await.is_err());
    }
}
