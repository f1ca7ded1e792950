//! Advanced policy example
//!
//! Stacks every layer on one policy, watches it through hooks, and reports its health through
//! a small in-process registry.

use parking_lot::Mutex;
use resilience_rs::{
    Backoff, CancellationToken, CircuitBreakerConfig, Criticality, HealthRegistry, HealthReporter,
    Hooks, Policy, PolicyError, RateLimitConfig, RetryConfig,
};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl ServiceError {
    fn new(msg: &str) -> Self {
        ServiceError(msg.to_string())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

#[derive(Default)]
struct Readiness {
    reporters: Mutex<Vec<Arc<dyn HealthReporter>>>,
}

impl HealthRegistry for Readiness {
    fn register(&self, reporter: Arc<dyn HealthReporter>) {
        self.reporters.lock().push(reporter);
    }
}

impl Readiness {
    fn report(&self) {
        for reporter in self.reporters.lock().iter() {
            let health = reporter.health();
            println!(
                "health: {} healthy={} state={} criticality={:?} dependencies={}",
                health.name,
                health.healthy,
                health.state,
                health.criticality,
                reporter.dependencies().len()
            );
        }
    }
}

// A service with varying failure and latency patterns
async fn external_service_call(call: u32, token: CancellationToken) -> Result<String, PolicyError<ServiceError>> {
    let latency = if call % 5 == 0 { 400 } else { 20 };
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(latency)) => {}
        _ = token.cancelled() => return Err(PolicyError::Cancelled),
    }

    match call {
        4..=12 => Err(ServiceError::new("Service temporarily unavailable").into()),
        13 => Err(PolicyError::permanent(ServiceError::new("Malformed request"))),
        _ => Ok(format!("response #{}", call)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience_rs=info".into()),
        )
        .init();

    println!("=== Advanced Policy Example ===\n");

    // 1. Hooks for observability
    let hooks = Hooks::new()
        .on_circuit_open(|policy| println!("[{}] circuit OPENED", policy))
        .on_circuit_half_open(|policy| println!("[{}] circuit HALF-OPEN, probing", policy))
        .on_circuit_close(|policy| println!("[{}] circuit CLOSED", policy))
        .on_retry(|policy, attempt, cause| println!("[{}] attempt {} failed: {}", policy, attempt, cause))
        .on_hedge_triggered(|policy| println!("[{}] slow call, hedging", policy))
        .on_hedge_won(|policy| println!("[{}] hedge won", policy))
        .on_rate_limited(|policy| println!("[{}] rate limited", policy))
        .on_fallback_used(|policy, cause| println!("[{}] serving fallback after: {}", policy, cause));

    // 2. A dependency and the policy that relies on it
    let readiness = Arc::new(Readiness::default());
    let cache = Policy::<String, ServiceError>::builder("cache")
        .circuit_breaker(CircuitBreakerConfig::new())
        .criticality(Criticality::NonCritical)
        .registry(readiness.clone())
        .build()?;

    // Options are given out of order on purpose; layers always nest the same way
    let policy = Policy::<String, ServiceError>::builder("catalog")
        .retry(
            RetryConfig::new(3, Backoff::exponential_jitter(Duration::from_millis(20)))
                .max_delay(Duration::from_millis(200))
                .per_attempt_timeout(Duration::from_millis(600)),
        )
        .hedge(Duration::from_millis(150))
        .fallback("cached catalog".to_string())
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(3)
                .recovery_timeout(Duration::from_secs(1))
                .half_open_max_attempts(2),
        )
        .rate_limit_with(RateLimitConfig::per_second(20).burst(5))
        .bulkhead(8)
        .timeout(Duration::from_secs(2))
        .depends_on(cache.reporter())
        .hooks(hooks)
        .registry(readiness.clone())
        .build()?;

    println!("layers: {:?}\n", policy.layers());

    // 3. Simulate a series of calls
    let counter = Arc::new(AtomicU32::new(0));
    let cx = CancellationToken::new();

    for i in 1..=15 {
        println!("\n--- Call {} ---", i);

        let result = policy
            .call(&cx, |token| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                external_service_call(call, token)
            })
            .await;

        match result {
            Ok(response) => println!("response: {}", response),
            Err(err) => println!("error: {}", err),
        }

        println!("breaker: {:?}", policy.breaker_snapshot());
        readiness.report();

        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    println!("\n=== Example Completed ===");
    Ok(())
}
