//! Transient/permanent error classification.
//!
//! Callers tag their errors explicitly; nothing inspects domain errors to guess. An error
//! without a tag is treated as transient, so it stays eligible for retry.

use std::fmt::{self, Display, Formatter};

use crate::error::PolicyError;

/// Retry eligibility of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The failure may go away on its own; retrying is worthwhile.
    Transient,

    /// Retrying cannot help.
    Permanent,
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Permanent => f.write_str("permanent"),
        }
    }
}

/// Tags `error` as transient.
pub fn transient<E>(error: E) -> PolicyError<E> {
    PolicyError::transient(error)
}

/// Tags `error` as permanent.
pub fn permanent<E>(error: E) -> PolicyError<E> {
    PolicyError::permanent(error)
}

/// Returns true unless `error` carries a permanent tag.
pub fn is_transient<E>(error: &PolicyError<E>) -> bool {
    error.is_transient()
}

/// Returns true if `error` carries a permanent tag.
pub fn is_permanent<E>(error: &PolicyError<E>) -> bool {
    error.is_permanent()
}
