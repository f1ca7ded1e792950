//! Retry with backoff, classification and per-attempt deadlines.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::{non_zero, ConfigError, PolicyError, PolicyResult};
use crate::hook::Events;
use crate::timeout;

type RetryPredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync + 'static>;

/// Settings for the retry engine.
///
/// ```rust
/// use std::time::Duration;
/// use resilience_rs::{Backoff, PolicyError, RetryConfig};
///
/// # #[derive(Debug)] struct MyError;
/// let retry = RetryConfig::<MyError>::new(4, Backoff::exponential(Duration::from_millis(50)))
///     .max_delay(Duration::from_secs(1))
///     .per_attempt_timeout(Duration::from_millis(300))
///     .retry_if(|err| !matches!(err, PolicyError::CircuitOpen));
/// ```
pub struct RetryConfig<E> {
    max_attempts: u32,
    backoff: Backoff,
    max_delay: Option<Duration>,
    per_attempt_timeout: Option<Duration>,
    retry_if: Option<RetryPredicate<E>>,
}

impl<E> RetryConfig<E> {
    /// At most `max_attempts` invocations (the first try included), waiting `backoff` between
    /// them.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            max_delay: None,
            per_attempt_timeout: None,
            retry_if: None,
        }
    }

    /// Caps every backoff delay.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Bounds each attempt individually, nested inside any whole-call timeout.
    pub fn per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(timeout);
        self
    }

    /// Only retries errors for which `predicate` returns true. Permanent errors are never
    /// retried regardless of the predicate.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if let Some(timeout) = self.per_attempt_timeout {
            non_zero(timeout, "per-attempt timeout")?;
        }
        Ok(())
    }
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            max_delay: self.max_delay,
            per_attempt_timeout: self.per_attempt_timeout,
            retry_if: self.retry_if.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .field("per_attempt_timeout", &self.per_attempt_timeout)
            .field("retry_if", &self.retry_if.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Loops attempts until success, a non-retryable error, or an exhausted budget.
pub struct Retry<E> {
    config: RetryConfig<E>,
    events: Events,
}

impl<E> Retry<E>
where
    E: Error + 'static,
{
    pub(crate) fn new(config: RetryConfig<E>, events: Events) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, events })
    }

    pub(crate) async fn execute<T, F, Fut>(&self, cx: &CancellationToken, op: F) -> PolicyResult<T, E>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.attempt(attempt, cx, &op).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(cx, &err) {
                return Err(err);
            }

            if attempt >= self.config.max_attempts {
                return Err(PolicyError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            self.events.retry(attempt, &err);

            let delay = self.delay_after(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cx.cancelled() => return Err(PolicyError::Cancelled),
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, attempt: u32, cx: &CancellationToken, op: &F) -> PolicyResult<T, E>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        let Some(limit) = self.config.per_attempt_timeout else {
            return op(cx.clone()).await;
        };

        match timeout::within(limit, cx, op).await {
            Some(result) => result,
            None => {
                self.events.attempt_timeout(attempt, limit);
                Err(PolicyError::Timeout)
            }
        }
    }

    fn should_retry(&self, cx: &CancellationToken, err: &PolicyError<E>) -> bool {
        if cx.is_cancelled() {
            return false;
        }
        if let Some(predicate) = &self.config.retry_if {
            if !predicate(err) {
                return false;
            }
        }
        !err.is_permanent()
    }

    /// `attempt` is the one-based number of the attempt that just failed.
    fn delay_after(&self, attempt: u32) -> Duration {
        let delay = self.config.backoff.delay(attempt - 1);
        match self.config.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    struct Flaky;

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("flaky")
        }
    }

    impl Error for Flaky {}

    fn retry(config: RetryConfig<Flaky>) -> Retry<Flaky> {
        Retry::new(config, Events::silent("test")).unwrap()
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = RetryConfig::<Flaky>::new(0, Backoff::constant(Duration::ZERO));
        assert!(matches!(
            Retry::new(config, Events::silent("test")),
            Err(ConfigError::ZeroAttempts)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_wraps_last_error() {
        let retry = retry(RetryConfig::new(3, Backoff::constant(Duration::from_millis(5))));
        let calls = AtomicU32::new(0);

        let result: PolicyResult<(), Flaky> = retry
            .execute(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PolicyError::from(Flaky)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(PolicyError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.operation(), Some(&Flaky));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delays_are_clamped_to_max_delay() {
        let retry = retry(
            RetryConfig::new(4, Backoff::exponential(Duration::from_millis(100)))
                .max_delay(Duration::from_millis(150)),
        );
        let start = Instant::now();

        let _: PolicyResult<(), Flaky> = retry
            .execute(&CancellationToken::new(), |_| async { Err(PolicyError::from(Flaky)) })
            .await;

        // 100ms, then 200ms and 400ms clamped to 150ms each.
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn per_attempt_timeout_bounds_each_attempt() {
        let retry = retry(
            RetryConfig::new(3, Backoff::constant(Duration::from_millis(1)))
                .per_attempt_timeout(Duration::from_millis(20)),
        );
        let calls = AtomicU32::new(0);

        let result: PolicyResult<u32, Flaky> = retry
            .execute(&CancellationToken::new(), |token| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        token.cancelled().await;
                        Err(PolicyError::Cancelled)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_backoff_wait() {
        let retry = retry(RetryConfig::new(5, Backoff::constant(Duration::from_secs(60))));
        let cx = CancellationToken::new();
        let canceller = cx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let calls = AtomicU32::new(0);

        let result: PolicyResult<(), Flaky> = retry
            .execute(&cx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PolicyError::from(Flaky)) }
            })
            .await;

        assert!(matches!(result, Err(PolicyError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
