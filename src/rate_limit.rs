//! Non-blocking token-bucket rate limiter.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{non_zero, ConfigError, PolicyError, PolicyResult};
use crate::hook::Events;

/// Settings for a token-bucket rate limiter.
///
/// The bucket holds at most `burst` tokens (defaults to `rate`) and refills continuously at
/// `rate` tokens per `period`. It starts full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    rate: u32,
    period: Duration,
    burst: Option<u32>,
}

impl RateLimitConfig {
    /// Admits `rate` calls per second.
    pub fn per_second(rate: u32) -> Self {
        Self::per(rate, Duration::from_secs(1))
    }

    /// Admits `rate` calls per `period`.
    pub fn per(rate: u32, period: Duration) -> Self {
        Self {
            rate,
            period,
            burst: None,
        }
    }

    /// Sets the bucket capacity.
    pub fn burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    fn capacity(&self) -> u32 {
        self.burst.unwrap_or(self.rate)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Admission gate limiting call throughput. Never waits for a token.
pub struct RateLimiter {
    capacity: f64,
    tokens_per_sec: f64,
    bucket: Mutex<Bucket>,
    events: Events,
}

impl RateLimiter {
    pub(crate) fn new(config: RateLimitConfig, events: Events) -> Result<Self, ConfigError> {
        if config.rate == 0 || config.capacity() == 0 {
            return Err(ConfigError::ZeroRate);
        }
        let period = non_zero(config.period, "rate limit period")?;
        let capacity = f64::from(config.capacity());

        Ok(Self {
            capacity,
            tokens_per_sec: f64::from(config.rate) / period.as_secs_f64(),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
            events,
        })
    }

    fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_sec).min(self.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub(crate) async fn execute<T, E, Fut>(&self, op: Fut) -> PolicyResult<T, E>
    where
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        if !self.try_acquire() {
            self.events.rate_limited();
            return Err(PolicyError::RateLimited);
        }
        op.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Never;

    async fn admit(limiter: &RateLimiter) -> bool {
        let result: PolicyResult<(), Never> = limiter.execute(async { Ok(()) }).await;
        result.is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(2), Events::silent("test")).unwrap();

        assert!(admit(&limiter).await);
        assert!(admit(&limiter).await);
        assert!(!admit(&limiter).await);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(admit(&limiter).await);
        assert!(!admit(&limiter).await);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_caps_accumulation() {
        let config = RateLimitConfig::per(10, Duration::from_secs(1)).burst(1);
        let limiter = RateLimiter::new(config, Events::silent("test")).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(admit(&limiter).await);
        assert!(!admit(&limiter).await);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateLimiter::new(RateLimitConfig::per_second(0), Events::silent("test")),
            Err(ConfigError::ZeroRate)
        ));
        assert!(matches!(
            RateLimiter::new(RateLimitConfig::per(1, Duration::ZERO), Events::silent("test")),
            Err(ConfigError::ZeroDuration(_))
        ));
    }
}
