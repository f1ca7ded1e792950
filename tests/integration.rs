use parking_lot::Mutex;
use proptest::prelude::*;
use resilience_rs::{
    permanent, Backoff, CancellationToken, CircuitBreakerConfig, ConfigError, Criticality,
    HealthRegistry, HealthReporter, Hooks, LayerKind, Policy, PolicyError, PolicyOption,
    PolicyResult, RateLimitConfig, RetryConfig, State,
};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// Custom error type that implements Error trait
#[derive(Debug, PartialEq)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

async fn failing(policy: &Policy<String, TestError>, calls: &AtomicU32) -> PolicyResult<String, TestError> {
    policy
        .call(&CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PolicyError::from(TestError::new("down"))) }
        })
        .await
}

async fn succeeding(policy: &Policy<String, TestError>, calls: &AtomicU32) -> PolicyResult<String, TestError> {
    policy
        .call(&CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("up".to_string()) }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold_and_rejects_without_invoking() {
    let policy = Policy::<String, TestError>::builder("breaker")
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(3)
                .recovery_timeout(Duration::from_secs(1)),
        )
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result = failing(&policy, &calls).await;
        assert!(matches!(result, Err(PolicyError::Operation { .. })));
    }
    assert_eq!(policy.circuit_state(), Some(State::Open));

    let result = succeeding(&policy, &calls).await;
    assert!(matches!(result, Err(PolicyError::CircuitOpen)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_success_closes_the_breaker() {
    let policy = Policy::<String, TestError>::builder("recovering")
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(2)
                .recovery_timeout(ms(500)),
        )
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let _ = failing(&policy, &calls).await;
    let _ = failing(&policy, &calls).await;
    assert_eq!(policy.circuit_state(), Some(State::Open));

    tokio::time::advance(ms(499)).await;
    assert!(matches!(
        succeeding(&policy, &calls).await,
        Err(PolicyError::CircuitOpen)
    ));

    tokio::time::advance(ms(1)).await;
    assert_eq!(succeeding(&policy, &calls).await.unwrap(), "up");

    let snapshot = policy.breaker_snapshot().unwrap();
    assert_eq!(snapshot.state, State::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_failure_reopens_and_restarts_the_timer() {
    let policy = Policy::<String, TestError>::builder("relapsing")
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .recovery_timeout(ms(500)),
        )
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let _ = failing(&policy, &calls).await;
    tokio::time::advance(ms(500)).await;

    let result = failing(&policy, &calls).await;
    assert!(matches!(result, Err(PolicyError::Operation { .. })));
    assert_eq!(policy.circuit_state(), Some(State::Open));

    // The open period restarted with the failed probe.
    tokio::time::advance(ms(300)).await;
    assert!(matches!(
        succeeding(&policy, &calls).await,
        Err(PolicyError::CircuitOpen)
    ));
    tokio::time::advance(ms(200)).await;
    assert!(succeeding(&policy, &calls).await.is_ok());
    assert_eq!(policy.circuit_state(), Some(State::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_success_waits_between_attempts() {
    let policy = Policy::<String, TestError>::builder("retrying")
        .retry(RetryConfig::new(3, Backoff::constant(ms(10))))
        .build()
        .unwrap();
    let calls = counter();
    let start = Instant::now();

    let result = policy
        .call(&CancellationToken::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(resilience_rs::transient(TestError::new("flaky")))
                } else {
                    Ok("done".to_string())
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= ms(20));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_is_not_retried() {
    let policy = Policy::<String, TestError>::builder("permanent")
        .retry(RetryConfig::new(5, Backoff::constant(ms(10))))
        .build()
        .unwrap();
    let calls = counter();

    let result = policy
        .call(&CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(permanent(TestError::new("invalid"))) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let err = result.unwrap_err();
    assert!(err.is_permanent());
    assert_eq!(err.into_operation(), Some(TestError::new("invalid")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_if_false_stops_immediately() {
    let policy = Policy::<String, TestError>::builder("selective")
        .retry(
            RetryConfig::new(5, Backoff::constant(ms(10)))
                .retry_if(|err: &PolicyError<TestError>| {
                    err.operation().map_or(true, |e: &TestError| e.0 != "fatal")
                }),
        )
        .build()
        .unwrap();
    let calls = counter();

    let result = policy
        .call(&CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PolicyError::from(TestError::new("fatal"))) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(PolicyError::Operation { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_rejects_instead_of_queueing() {
    let full = counter();
    let hooks = {
        let full = Arc::clone(&full);
        Hooks::new().on_bulkhead_full(move |_| {
            full.fetch_add(1, Ordering::SeqCst);
        })
    };
    let policy = Arc::new(
        Policy::<String, TestError>::builder("bulkhead")
            .bulkhead(3)
            .hooks(hooks)
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..6u64 {
        let policy = Arc::clone(&policy);
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(ms(10 * i)).await;
            let started = Instant::now();
            let result = policy
                .call(&CancellationToken::new(), |_| async {
                    tokio::time::sleep(ms(200)).await;
                    Ok("done".to_string())
                })
                .await;
            (result, started.elapsed())
        }));
    }

    let mut ok = 0;
    let mut rejected = 0;
    for handle in handles {
        let (result, elapsed) = handle.await.unwrap();
        match result {
            Ok(_) => ok += 1,
            Err(PolicyError::BulkheadFull) => {
                assert_eq!(elapsed, Duration::ZERO, "rejection must not wait for a slot");
                rejected += 1;
            }
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    assert_eq!(ok, 3);
    assert_eq!(rejected, 3);
    assert_eq!(full.load(Ordering::SeqCst), 3);
    assert_eq!(policy.bulkhead_in_flight(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_hedge_launches_one_duplicate_and_cancels_the_loser() {
    let triggered = counter();
    let won = counter();
    let hooks = Hooks::new()
        .on_hedge_triggered({
            let triggered = Arc::clone(&triggered);
            move |_| {
                triggered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_hedge_won({
            let won = Arc::clone(&won);
            move |_| {
                won.fetch_add(1, Ordering::SeqCst);
            }
        });
    let policy = Policy::<String, TestError>::builder("hedged")
        .hedge(ms(100))
        .hooks(hooks)
        .build()
        .unwrap();
    let tokens = Mutex::new(Vec::new());

    let result = policy
        .call(&CancellationToken::new(), |token| {
            tokens.lock().push(token.clone());
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(ms(300)) => Ok("slow".to_string()),
                    _ = token.cancelled() => Err(PolicyError::Cancelled),
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "slow");
    let tokens = tokens.lock();
    assert_eq!(tokens.len(), 2);
    assert!(!tokens[0].is_cancelled(), "primary finished first");
    assert!(tokens[1].is_cancelled(), "losing hedge must be cancelled");
    assert_eq!(triggered.load(Ordering::SeqCst), 1);
    assert_eq!(won.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hedge_wins_against_a_stuck_primary() {
    let triggered = counter();
    let won = counter();
    let hooks = Hooks::new()
        .on_hedge_triggered({
            let triggered = Arc::clone(&triggered);
            move |_| {
                triggered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_hedge_won({
            let won = Arc::clone(&won);
            move |_| {
                won.fetch_add(1, Ordering::SeqCst);
            }
        });
    let policy = Policy::<String, TestError>::builder("rescued")
        .hedge(ms(100))
        .hooks(hooks)
        .build()
        .unwrap();
    let tokens = Mutex::new(Vec::new());
    let start = Instant::now();

    let result = policy
        .call(&CancellationToken::new(), |token| {
            let primary = {
                let mut tokens = tokens.lock();
                tokens.push(token.clone());
                tokens.len() == 1
            };
            async move {
                if primary {
                    token.cancelled().await;
                    return Err(PolicyError::Cancelled);
                }
                tokio::time::sleep(ms(20)).await;
                Ok("hedge".to_string())
            }
        })
        .await;

    assert_eq!(result.unwrap(), "hedge");
    assert!(start.elapsed() >= ms(120) && start.elapsed() < ms(130));
    let tokens = tokens.lock();
    assert_eq!(tokens.len(), 2);
    assert!(tokens[0].is_cancelled(), "losing primary must be cancelled");
    assert!(!tokens[1].is_cancelled());
    assert_eq!(triggered.load(Ordering::SeqCst), 1);
    assert_eq!(won.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_suppresses_exhausted_retries() {
    let causes = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let causes = Arc::clone(&causes);
        Hooks::new().on_fallback_used(move |_, cause| {
            let exhausted = matches!(
                cause.downcast_ref::<PolicyError<TestError>>(),
                Some(PolicyError::RetriesExhausted { attempts: 2, .. })
            );
            causes.lock().push(exhausted);
        })
    };
    let policy = Policy::<String, TestError>::builder("fallback")
        .fallback("X".to_string())
        .retry(RetryConfig::new(2, Backoff::constant(ms(1))))
        .hooks(hooks)
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let result = failing(&policy, &calls).await;

    assert_eq!(result.unwrap(), "X");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*causes.lock(), vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bounds_the_whole_call() {
    let timeouts = counter();
    let hooks = {
        let timeouts = Arc::clone(&timeouts);
        Hooks::new().on_timeout(move |_| {
            timeouts.fetch_add(1, Ordering::SeqCst);
        })
    };
    let policy = Policy::<String, TestError>::builder("deadline")
        .timeout(ms(50))
        .retry(RetryConfig::new(10, Backoff::constant(ms(20))))
        .hooks(hooks)
        .build()
        .unwrap();
    let start = Instant::now();

    let result = policy
        .call(&CancellationToken::new(), |_| async {
            tokio::time::sleep(ms(30)).await;
            Err(PolicyError::from(TestError::new("slow and wrong")))
        })
        .await;

    assert!(matches!(result, Err(PolicyError::Timeout)));
    assert!(start.elapsed() >= ms(50) && start.elapsed() < ms(60));
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_calls_are_rejected_until_tokens_refill() {
    let policy = Policy::<String, TestError>::builder("limited")
        .rate_limit_with(RateLimitConfig::per_second(2))
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    assert!(succeeding(&policy, &calls).await.is_ok());
    assert!(succeeding(&policy, &calls).await.is_ok());
    assert!(matches!(
        succeeding(&policy, &calls).await,
        Err(PolicyError::RateLimited)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(ms(500)).await;
    assert!(succeeding(&policy, &calls).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancellation_reaches_the_operation() {
    let policy = Policy::<String, TestError>::builder("cancellable")
        .retry(RetryConfig::new(3, Backoff::constant(Duration::from_secs(10))))
        .hedge(ms(50))
        .build()
        .unwrap();
    let cx = CancellationToken::new();
    let canceller = cx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ms(80)).await;
        canceller.cancel();
    });
    let tokens = Mutex::new(Vec::new());

    let result = policy
        .call(&cx, |token| {
            tokens.lock().push(token.clone());
            async move {
                token.cancelled().await;
                Err(PolicyError::Cancelled)
            }
        })
        .await;

    assert!(matches!(result, Err(PolicyError::Cancelled)));
    let tokens = tokens.lock();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().all(|token| token.is_cancelled()));
}

#[tokio::test(start_paused = true)]
async fn test_hooks_fire_in_event_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let events = Arc::clone(&events);
        move |_: &str| events.lock().push(name.to_string())
    };
    let hooks = Hooks::new()
        .on_bulkhead_acquired(record("acquired"))
        .on_bulkhead_released(record("released"))
        .on_circuit_open(record("open"))
        .on_retry({
            let events = Arc::clone(&events);
            move |_, attempt, _| events.lock().push(format!("retry {}", attempt))
        });
    let policy = Policy::<String, TestError>::builder("ordered")
        .retry(RetryConfig::new(2, Backoff::constant(ms(1))))
        .bulkhead(1)
        .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(1))
        .hooks(hooks)
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let result = failing(&policy, &calls).await;

    assert!(matches!(result, Err(PolicyError::RetriesExhausted { .. })));
    assert_eq!(
        *events.lock(),
        vec!["acquired", "retry 1", "released", "open"]
    );
}

#[derive(Default)]
struct CollectingRegistry {
    reporters: Mutex<Vec<Arc<dyn HealthReporter>>>,
}

impl HealthRegistry for CollectingRegistry {
    fn register(&self, reporter: Arc<dyn HealthReporter>) {
        self.reporters.lock().push(reporter);
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_follows_the_breaker() {
    let registry = Arc::new(CollectingRegistry::default());
    let database = Policy::<String, TestError>::builder("database")
        .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(1))
        .build()
        .unwrap();
    let policy = Policy::<String, TestError>::builder("api")
        .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(1))
        .criticality(Criticality::NonCritical)
        .depends_on(database.reporter())
        .registry(registry.clone())
        .build()
        .unwrap();

    let reporters = registry.reporters.lock().clone();
    assert_eq!(reporters.len(), 1);
    assert_eq!(reporters[0].name(), "api");
    assert_eq!(reporters[0].dependencies()[0].name(), "database");

    let health = policy.health();
    assert!(health.healthy);
    assert_eq!(health.state, "closed");
    assert_eq!(health.criticality, Criticality::NonCritical);

    let calls = AtomicU32::new(0);
    let _ = failing(&policy, &calls).await;

    let health = reporters[0].health();
    assert!(!health.healthy);
    assert_eq!(health.state, "open");

    let bare = Policy::<String, TestError>::new("bare", []).unwrap();
    assert_eq!(bare.health().state, "none");
    assert!(bare.health().healthy);
}

#[test]
fn test_oversized_bulkhead_is_a_config_error() {
    let result = Policy::<String, TestError>::new("huge", [PolicyOption::Bulkhead(usize::MAX)]);

    assert!(matches!(
        result,
        Err(ConfigError::CapacityTooLarge { capacity: usize::MAX, .. })
    ));
}

#[test]
fn test_code_options_override_config_options() {
    let from_config: Vec<PolicyOption<String, TestError>> = vec![
        PolicyOption::Bulkhead(10),
        PolicyOption::RateLimit(RateLimitConfig::per_second(100)),
    ];
    let policy = Policy::<String, TestError>::builder("layered")
        .options(from_config)
        .bulkhead(1)
        .build()
        .unwrap();

    assert_eq!(policy.layers(), vec![LayerKind::RateLimit, LayerKind::Bulkhead]);
    assert_eq!(policy.bulkhead_in_flight(), Some(0));
}

fn every_option() -> Vec<PolicyOption<String, TestError>> {
    vec![
        PolicyOption::Fallback("fallback".to_string()),
        PolicyOption::Timeout(Duration::from_secs(1)),
        PolicyOption::CircuitBreaker(CircuitBreakerConfig::new()),
        PolicyOption::RateLimit(RateLimitConfig::per_second(10)),
        PolicyOption::Bulkhead(4),
        PolicyOption::Retry(RetryConfig::new(3, Backoff::constant(ms(1)))),
        PolicyOption::Hedge(ms(50)),
    ]
}

proptest! {
    #[test]
    fn test_option_order_never_changes_layer_order(
        order in Just((0..7usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut options: Vec<Option<PolicyOption<String, TestError>>> =
            every_option().into_iter().map(Some).collect();
        let shuffled: Vec<_> = order.iter().map(|&i| options[i].take().unwrap()).collect();

        let policy = Policy::new("shuffled", shuffled).unwrap();
        prop_assert_eq!(policy.layers(), LayerKind::ORDER.to_vec());
    }
}
