//! Token Bucket
//!
//! Continuous-refill rate limiter gating outbound chart calls. Tokens accrue
//! at `rate` per second up to `capacity`; each call spends one. Callers
//! waiting for a token poll at a short fixed interval and never fail for
//! lack of tokens.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Poll interval while waiting for a token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate` tokens per second.
    #[must_use]
    pub fn new(rate: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            rate: rate.max(f64::MIN_POSITIVE),
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available and take it.
    pub async fn consume(&self) {
        while !self.try_acquire() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Tokens currently available (after refill).
    #[must_use]
    pub fn available(&self) -> f64 {
        let bucket = self.bucket.lock();
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        (bucket.tokens + elapsed * self.rate).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity() {
        let bucket = TokenBucket::new(5.0, 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(5.0, 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped() {
        let bucket = TokenBucket::new(5.0, 5);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.available() - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_waits_for_refill() {
        let bucket = TokenBucket::new(5.0, 1);
        bucket.consume().await;

        let start = Instant::now();
        bucket.consume().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(200));
        assert!(waited <= Duration::from_millis(300));
    }
}
