//! Core circuit breaker implementation.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{ConfigError, PolicyError, PolicyResult};
use crate::hook::Events;
use crate::state::State;

/// Settings for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_attempts: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of consecutive failures that trips the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets how long the circuit stays open before admitting probes.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets how many trial calls are admitted while half-open. All of them must succeed for
    /// the circuit to close.
    pub fn half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.half_open_max_attempts = attempts;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.half_open_max_attempts == 0 {
            return Err(ConfigError::ZeroHalfOpenAttempts);
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: State,
    /// Consecutive failures counted while closed.
    pub consecutive_failures: u32,
    /// Probes admitted during the current half-open period.
    pub probes_admitted: u32,
    /// Probes that succeeded during the current half-open period.
    pub probes_succeeded: u32,
}

/// How a finished call affects the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Neither success nor failure: local rejections, caller cancellation, abandoned calls.
    Ignored,
}

impl Outcome {
    fn of<T, E>(result: &PolicyResult<T, E>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(err) if err.is_rejection() => Outcome::Ignored,
            Err(PolicyError::Cancelled) => Outcome::Ignored,
            Err(_) => Outcome::Failure,
        }
    }
}

#[derive(Debug)]
struct Machine {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_admitted: u32,
    probes_succeeded: u32,
    /// Bumped on every transition so outcomes from an earlier period are discarded.
    generation: u64,
}

impl Machine {
    fn transition(&mut self, to: State) {
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
        self.probes_admitted = 0;
        self.probes_succeeded = 0;
        match to {
            State::Open => self.opened_at = Some(Instant::now()),
            State::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
            }
            State::HalfOpen => {}
        }
    }
}

/// A per-policy circuit breaker guarding calls to a dependency.
///
/// All state lives behind one mutex; the transition check and the admission decision for a
/// call happen under a single lock acquisition. Hooks run after the lock is released.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    machine: Mutex<Machine>,
    events: Events,
}

impl CircuitBreaker {
    pub(crate) fn new(config: CircuitBreakerConfig, events: Events) -> Self {
        Self {
            config,
            machine: Mutex::new(Machine {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_admitted: 0,
                probes_succeeded: 0,
                generation: 0,
            }),
            events,
        }
    }

    /// Gets the current state. Does not evaluate the recovery timeout.
    pub fn current_state(&self) -> State {
        self.machine.lock().state
    }

    /// Gets a consistent snapshot of the breaker's counters.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let machine = self.machine.lock();
        BreakerSnapshot {
            state: machine.state,
            consecutive_failures: machine.consecutive_failures,
            probes_admitted: machine.probes_admitted,
            probes_succeeded: machine.probes_succeeded,
        }
    }

    /// Runs `op` if the breaker admits the call and records its outcome.
    pub(crate) async fn execute<T, E, Fut>(&self, op: Fut) -> PolicyResult<T, E>
    where
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        let permit = self.acquire::<E>()?;
        let result = op.await;
        permit.record(Outcome::of(&result));
        result
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, PolicyError<E>> {
        let mut half_opened = false;
        let admitted = {
            let mut machine = self.machine.lock();

            if machine.state == State::Open {
                let elapsed = machine
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    machine.transition(State::HalfOpen);
                    half_opened = true;
                }
            }

            match machine.state {
                State::Closed => Some((machine.generation, false)),
                State::HalfOpen if machine.probes_admitted < self.config.half_open_max_attempts => {
                    machine.probes_admitted += 1;
                    Some((machine.generation, true))
                }
                State::HalfOpen | State::Open => None,
            }
        };

        if half_opened {
            self.events.circuit_half_open();
        }

        match admitted {
            Some((generation, probe)) => Ok(Permit {
                breaker: self,
                generation,
                probe,
                recorded: false,
            }),
            None => {
                self.events.circuit_rejected();
                Err(PolicyError::CircuitOpen)
            }
        }
    }

    fn on_outcome(&self, generation: u64, probe: bool, outcome: Outcome) {
        let transitioned = {
            let mut machine = self.machine.lock();
            if machine.generation != generation {
                return;
            }

            match (machine.state, outcome) {
                (State::Closed, Outcome::Success) => {
                    machine.consecutive_failures = 0;
                    None
                }
                (State::Closed, Outcome::Failure) => {
                    machine.consecutive_failures = machine.consecutive_failures.saturating_add(1);
                    if machine.consecutive_failures >= self.config.failure_threshold {
                        machine.transition(State::Open);
                        Some(State::Open)
                    } else {
                        None
                    }
                }
                (State::HalfOpen, Outcome::Success) if probe => {
                    machine.probes_succeeded += 1;
                    if machine.probes_succeeded >= self.config.half_open_max_attempts {
                        machine.transition(State::Closed);
                        Some(State::Closed)
                    } else {
                        None
                    }
                }
                (State::HalfOpen, Outcome::Failure) if probe => {
                    machine.transition(State::Open);
                    Some(State::Open)
                }
                (State::HalfOpen, Outcome::Ignored) if probe => {
                    machine.probes_admitted = machine.probes_admitted.saturating_sub(1);
                    None
                }
                _ => None,
            }
        };

        match transitioned {
            Some(State::Open) => self.events.circuit_open(),
            Some(State::Closed) => self.events.circuit_close(),
            Some(State::HalfOpen) | None => {}
        }
    }
}

/// Admission granted by the breaker for one call.
///
/// Dropping a permit without recording an outcome counts as [`Outcome::Ignored`], so a
/// half-open probe abandoned by an outer timeout gives its slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    recorded: bool,
}

impl Permit<'_> {
    fn record(mut self, outcome: Outcome) {
        self.recorded = true;
        self.breaker.on_outcome(self.generation, self.probe, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker
                .on_outcome(self.generation, self.probe, Outcome::Ignored);
        }
    }
}
