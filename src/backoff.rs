//! Delay strategies between retry attempts.

use std::time::Duration;

use crate::error::ConfigError;

/// Maps a zero-based attempt index (the number of failed attempts so far, minus one) to the
/// delay before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always waits `base`.
    Constant(Duration),

    /// Waits `step × (index + 1)`.
    Linear(Duration),

    /// Waits `base × 2^index`.
    Exponential(Duration),

    /// Waits a uniformly random duration in `[0, base × 2^index)`.
    ExponentialJitter(Duration),
}

impl Backoff {
    /// Constant backoff.
    pub fn constant(base: Duration) -> Self {
        Backoff::Constant(base)
    }

    /// Linear backoff.
    pub fn linear(step: Duration) -> Self {
        Backoff::Linear(step)
    }

    /// Exponential backoff.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential(base)
    }

    /// Exponential backoff with full jitter.
    pub fn exponential_jitter(base: Duration) -> Self {
        Backoff::ExponentialJitter(base)
    }

    /// Resolves a strategy by its configuration identifier.
    ///
    /// Accepted names are `constant`, `linear`, `exponential` and `exponential_jitter`
    /// (also spelled `exponential-jitter` or `jitter`), case-insensitively.
    pub fn from_name(name: &str, base: Duration) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "constant" => Ok(Backoff::Constant(base)),
            "linear" => Ok(Backoff::Linear(base)),
            "exponential" => Ok(Backoff::Exponential(base)),
            "exponential_jitter" | "exponential-jitter" | "jitter" => {
                Ok(Backoff::ExponentialJitter(base))
            }
            _ => Err(ConfigError::UnknownBackoff(name.to_string())),
        }
    }

    /// Delay before the next attempt, given how many attempts have failed so far minus one.
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn delay(&self, attempt_index: u32) -> Duration {
        match *self {
            Backoff::Constant(base) => base,
            Backoff::Linear(step) => step
                .checked_mul(attempt_index.saturating_add(1))
                .unwrap_or(Duration::MAX),
            Backoff::Exponential(base) => doubled(base, attempt_index),
            Backoff::ExponentialJitter(base) => {
                let cap = doubled(base, attempt_index);
                // Uniform in [0, cap); rounding must not land on cap itself.
                let ceiling = cap.saturating_sub(Duration::from_nanos(1));
                Duration::try_from_secs_f64(cap.as_secs_f64() * fastrand::f64())
                    .map(|delay| delay.min(ceiling))
                    .unwrap_or(ceiling)
            }
        }
    }
}

fn doubled(base: Duration, times: u32) -> Duration {
    1u32.checked_shl(times)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}
