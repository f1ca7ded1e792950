//! Circuit breaker states.

use std::fmt::{self, Display, Formatter};

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// Circuit is allowing a limited number of operations to test recovery.
    HalfOpen,
}

impl State {
    /// Human-readable label used in logs and health reports.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }

    /// Closed and half-open breakers report healthy; an open breaker does not.
    pub fn is_healthy(self) -> bool {
        !matches!(self, State::Open)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
