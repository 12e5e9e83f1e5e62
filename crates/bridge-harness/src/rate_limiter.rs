//! Global + per-user token buckets for the ingress admission path.
//!
//! Unlike a try-and-drop limiter, admission here *waits* on both buckets —
//! ingress never rejects a message for being too fast, it just queues the
//! caller until both buckets have room. Callers race the wait against
//! cancellation (a dropped future, or a `tokio::select!` against a shutdown
//! signal) rather than polling an error variant.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::trace;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub tokens_per_second: f64,
    /// Maximum burst size (bucket capacity).
    pub max_burst: f64,
}

impl RateLimitConfig {
    pub fn new(tokens_per_second: f64, max_burst: f64) -> Self {
        Self { tokens_per_second, max_burst }
    }
}

// ---------------------------------------------------------------------------
// Bucket (per-key state)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_burst: f64) -> Self {
        Self { tokens: max_burst, last_refill: Instant::now() }
    }

    fn refill(&mut self, tokens_per_second: f64, max_burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_burst);
        self.last_refill = now;
    }

    /// Consume `cost` tokens if available; otherwise return how long the
    /// caller must wait before trying again.
    fn try_consume(&mut self, cost: f64, tokens_per_second: f64, max_burst: f64) -> Result<(), Duration> {
        self.refill(tokens_per_second, max_burst);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            Err(Duration::from_secs_f64(deficit / tokens_per_second))
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter — single bucket, single key ("global") or per-key map
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    /// Wait until `key`'s bucket has a token, then consume it. Cancel-safe:
    /// dropping this future before it resolves leaves no token consumed.
    pub async fn admit(&self, key: &str) {
        loop {
            let wait = {
                let mut bucket =
                    self.buckets.entry(key.to_string()).or_insert_with(|| TokenBucket::new(self.config.max_burst));
                match bucket.try_consume(1.0, self.config.tokens_per_second, self.config.max_burst) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            trace!(key, ?wait, "rate limiter admission wait");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn remaining(&self, key: &str) -> f64 {
        match self.buckets.get(key) {
            Some(bucket) => {
                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                (bucket.tokens + elapsed * self.config.tokens_per_second).min(self.config.max_burst)
            }
            None => self.config.max_burst,
        }
    }
}

// ---------------------------------------------------------------------------
// IngressLimiter — global + per-user, wait on both
// ---------------------------------------------------------------------------

const GLOBAL_KEY: &str = "__global__";

/// Admission control for the ingress path. Waits on the global bucket, then
/// the caller's per-user bucket; cancellation (dropping the returned future)
/// propagates normally since both awaits are plain `.await` points.
#[derive(Debug)]
pub struct IngressLimiter {
    global: RateLimiter,
    per_user: RateLimiter,
}

impl IngressLimiter {
    pub fn new(global: RateLimitConfig, per_user: RateLimitConfig) -> Self {
        Self { global: RateLimiter::new(global), per_user: RateLimiter::new(per_user) }
    }

    /// Wait on both buckets in order: global first (so a global slowdown is
    /// visible even to a user who has per-user budget left), then per-user.
    pub async fn admit(&self, user_key: &str) {
        self.global.admit(GLOBAL_KEY).await;
        self.per_user.admit(user_key).await;
    }

    pub fn global_remaining(&self) -> f64 {
        self.global.remaining(GLOBAL_KEY)
    }

    pub fn user_remaining(&self, user_key: &str) -> f64 {
        self.per_user.remaining(user_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration as TDuration;

    #[tokio::test]
    async fn admit_consumes_a_token_immediately_when_available() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10.0, 10.0));
        let before = limiter.remaining("u1");
        limiter.admit("u1").await;
        assert!(limiter.remaining("u1") < before);
    }

    #[tokio::test]
    async fn admit_waits_when_bucket_is_empty() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1000.0, 1.0));
        limiter.admit("u1").await; // drains the single burst token

        let start = Instant::now();
        limiter.admit("u1").await;
        assert!(start.elapsed() >= TDuration::from_millis(1));
    }

    #[tokio::test]
    async fn ingress_limiter_waits_on_both_buckets() {
        let limiter = IngressLimiter::new(RateLimitConfig::new(5.0, 1.0), RateLimitConfig::new(1000.0, 1000.0));
        limiter.admit("chat-1").await;
        let start = Instant::now();
        limiter.admit("chat-1").await; // global bucket now forces a wait
        assert!(start.elapsed() > TDuration::from_millis(50));
    }

    #[tokio::test]
    async fn per_user_buckets_are_independent() {
        let limiter = IngressLimiter::new(RateLimitConfig::new(1000.0, 1000.0), RateLimitConfig::new(1000.0, 1.0));
        limiter.admit("chat-a").await;
        assert!(limiter.user_remaining("chat-a") < 1.0);
        assert_eq!(limiter.user_remaining("chat-b"), 1.0);
    }
}
