use resilience_rs::prelude::*;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience_rs=debug".into()),
        )
        .init();

    // Retry flaky calls, and stop calling altogether once the service looks down
    let policy = Policy::<String, ServiceError>::builder("inventory")
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .failure_threshold(3)
                .recovery_timeout(Duration::from_secs(2)),
        )
        .retry(RetryConfig::new(2, Backoff::exponential(Duration::from_millis(50))))
        .build()?;

    println!("Circuit initial state: {:?}", policy.circuit_state());

    let counter = AtomicU32::new(0);
    let cx = CancellationToken::new();

    for i in 1..=12 {
        println!("\nAttempt {}: ", i);

        let result = policy
            .call(&cx, |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    // Healthy, then down for a while, then healthy again
                    if (4..14).contains(&n) {
                        Err(PolicyError::from(ServiceError("External service error".to_string())))
                    } else {
                        Ok("Success".to_string())
                    }
                }
            })
            .await;

        match result {
            Ok(result) => println!("Call succeeded with result: {}", result),
            Err(PolicyError::CircuitOpen) => {
                println!("Circuit is open, waiting before retry...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(err) => println!("Call failed with error: {}", err),
        }

        println!("Current state: {:?}", policy.circuit_state());

        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    Ok(())
}
