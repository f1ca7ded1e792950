//! Error types for resilience policies.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::classify::ErrorClass;

/// Result type for policy calls.
pub type PolicyResult<T, E> = Result<T, PolicyError<E>>;

/// Error type for policy calls.
///
/// The rejection variants are produced by the policy itself without invoking the wrapped
/// function. `Operation` carries the caller's own error, optionally tagged with an
/// [`ErrorClass`].
#[derive(Debug)]
pub enum PolicyError<E> {
    /// The circuit is open, the call was not attempted.
    CircuitOpen,

    /// Every bulkhead slot is taken, the call was not attempted.
    BulkheadFull,

    /// The rate limiter had no permit available, the call was not attempted.
    RateLimited,

    /// A deadline was reached before the call completed.
    Timeout,

    /// The governing cancellation token was cancelled.
    Cancelled,

    /// The retry budget ran out; `last` is the error of the final attempt.
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        last: Box<PolicyError<E>>,
    },

    /// The wrapped operation failed.
    Operation {
        /// The caller's error.
        error: E,
        /// Classification attached by the caller, if any.
        class: Option<ErrorClass>,
    },
}

impl<E> PolicyError<E> {
    /// Wraps `error` tagged as transient (eligible for retry).
    pub fn transient(error: E) -> Self {
        PolicyError::Operation {
            error,
            class: Some(ErrorClass::Transient),
        }
    }

    /// Wraps `error` tagged as permanent (never retried).
    pub fn permanent(error: E) -> Self {
        PolicyError::Operation {
            error,
            class: Some(ErrorClass::Permanent),
        }
    }

    /// The classification of this error. Untagged errors, including the policy's own
    /// rejections, are transient.
    pub fn class(&self) -> ErrorClass {
        match self {
            PolicyError::Operation {
                class: Some(class), ..
            } => *class,
            PolicyError::RetriesExhausted { last, .. } => last.class(),
            _ => ErrorClass::Transient,
        }
    }

    /// Returns true unless the error carries a permanent tag.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns true if the error carries a permanent tag.
    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }

    /// Returns true for rejections decided locally without invoking the operation
    /// (rate limiter, bulkhead, circuit breaker).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PolicyError::CircuitOpen | PolicyError::BulkheadFull | PolicyError::RateLimited
        )
    }

    /// The caller's original error, looking through retry wrappers.
    pub fn operation(&self) -> Option<&E> {
        match self {
            PolicyError::Operation { error, .. } => Some(error),
            PolicyError::RetriesExhausted { last, .. } => last.operation(),
            _ => None,
        }
    }

    /// Consumes the error, returning the caller's original error if there is one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            PolicyError::Operation { error, .. } => Some(error),
            PolicyError::RetriesExhausted { last, .. } => last.into_operation(),
            _ => None,
        }
    }
}

impl<E> From<E> for PolicyError<E> {
    fn from(error: E) -> Self {
        PolicyError::Operation { error, class: None }
    }
}

impl<E> Display for PolicyError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::CircuitOpen => write!(f, "circuit breaker is open"),
            PolicyError::BulkheadFull => write!(f, "bulkhead is full"),
            PolicyError::RateLimited => write!(f, "rate limit exceeded"),
            PolicyError::Timeout => write!(f, "deadline exceeded"),
            PolicyError::Cancelled => write!(f, "call cancelled"),
            PolicyError::RetriesExhausted { attempts, last } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, last)
            }
            PolicyError::Operation { error, .. } => write!(f, "{}", error),
        }
    }
}

impl<E: Error + 'static> Error for PolicyError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PolicyError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            PolicyError::Operation { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Errors detected while building a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The policy name is empty.
    #[error("policy name must not be empty")]
    EmptyName,

    /// Retry was configured with no attempts.
    #[error("retry max attempts must be at least 1")]
    ZeroAttempts,

    /// Bulkhead was configured with no slots.
    #[error("bulkhead capacity must be at least 1")]
    ZeroCapacity,

    /// Bulkhead capacity exceeds what the slot pool can hold.
    #[error("bulkhead capacity {capacity} exceeds the maximum of {max}")]
    CapacityTooLarge {
        /// The requested capacity.
        capacity: usize,
        /// The largest supported capacity.
        max: usize,
    },

    /// Rate limiter was configured with no permits per period.
    #[error("rate limit must admit at least 1 call per period")]
    ZeroRate,

    /// Circuit breaker failure threshold is zero.
    #[error("circuit breaker failure threshold must be at least 1")]
    ZeroFailureThreshold,

    /// Circuit breaker admits no trial calls while half-open.
    #[error("circuit breaker half-open max attempts must be at least 1")]
    ZeroHalfOpenAttempts,

    /// A duration-valued setting is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// A backoff strategy name was not recognised.
    #[error("unknown backoff strategy `{0}`")]
    UnknownBackoff(String),
}

pub(crate) fn non_zero(duration: Duration, setting: &'static str) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        Err(ConfigError::ZeroDuration(setting))
    } else {
        Ok(duration)
    }
}
