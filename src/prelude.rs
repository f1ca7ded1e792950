//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use resilience_rs::prelude::*;
//! ```

pub use crate::{
    permanent, transient, Backoff, CancellationToken, CircuitBreakerConfig, Hooks, Policy,
    PolicyError, PolicyResult, RateLimitConfig, RetryConfig, State,
};
