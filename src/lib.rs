//! # resilience-rs
//!
//! Composable resilience policies for async Rust: wrap a fallible, cancellable operation in a
//! named [`Policy`] assembled from independent patterns and call it through the policy instead
//! of directly.
//!
//! ## Layers
//!
//! A policy contains any subset of seven layers. However the options are given, the layers are
//! always nested in this order, outermost first:
//!
//! - **Fallback**: returns a static value instead of any error.
//! - **Timeout**: bounds the whole call's wall-clock time.
//! - **Circuit breaker**: fails fast while the dependency looks unhealthy.
//! - **Rate limiter**: rejects calls beyond the configured throughput.
//! - **Bulkhead**: rejects calls beyond the configured concurrency.
//! - **Retry**: re-invokes failed attempts with backoff.
//! - **Hedge**: races a delayed duplicate against a slow attempt.
//!
//! Outer layers express whole-call intent; inner layers deal with single admissions and
//! attempts. Rejections never queue: the breaker, rate limiter and bulkhead decide immediately.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::time::Duration;
//! use resilience_rs::{permanent, Backoff, Policy, PolicyError, RetryConfig};
//! use resilience_rs::CancellationToken;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! impl std::fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "service error: {}", self.0)
//!     }
//! }
//!
//! impl std::error::Error for ServiceError {}
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = Policy::<String, ServiceError>::builder("profile-service")
//!     .timeout(Duration::from_secs(1))
//!     .bulkhead(32)
//!     .retry(RetryConfig::new(3, Backoff::exponential_jitter(Duration::from_millis(20))))
//!     .build()?;
//!
//! let cx = CancellationToken::new();
//! match policy.call(&cx, |_cx| async { Ok("profile".to_string()) }).await {
//!     Ok(profile) => println!("got {}", profile),
//!     Err(PolicyError::BulkheadFull) => println!("too many calls in flight"),
//!     Err(err) => println!("call failed: {}", err),
//! }
//!
//! // Permanent errors are never retried.
//! let result = policy
//!     .call(&cx, |_cx| async { Err(permanent(ServiceError("bad request".into()))) })
//!     .await;
//! assert!(result.unwrap_err().is_permanent());
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! The wrapped function returns [`PolicyResult<T, E>`]. Plain errors convert with `?` or
//! [`From`] and count as transient; [`transient`] and [`permanent`] tag them explicitly. The
//! original error is always recoverable with [`PolicyError::operation`].
//!
//! ## Observability
//!
//! Every lifecycle event is logged through [`tracing`] and passed to the optional [`Hooks`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod backoff;
mod breaker;
mod bulkhead;
mod classify;
mod config;
mod error;
mod fallback;
mod health;
mod hedge;
mod hook;
pub mod prelude;
mod policy;
mod rate_limit;
mod retry;
mod state;
mod timeout;

// Re-exports
pub use backoff::Backoff;
pub use breaker::{BreakerSnapshot, CircuitBreakerConfig};
pub use classify::{is_permanent, is_transient, permanent, transient, ErrorClass};
pub use config::{PolicyBuilder, PolicyOption};
pub use error::{ConfigError, PolicyError, PolicyResult};
pub use health::{Criticality, HealthRegistry, HealthReporter, HealthStatus};
pub use hook::Hooks;
pub use policy::{LayerKind, Policy};
pub use rate_limit::RateLimitConfig;
pub use retry::RetryConfig;
pub use state::State;
pub use tokio_util::sync::CancellationToken;
