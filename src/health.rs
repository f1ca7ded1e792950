//! Health reporting interfaces consumed by external registries.

use std::fmt;
use std::sync::Arc;

use crate::breaker::CircuitBreaker;

/// How much a failing component matters to the process as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Criticality {
    /// An unhealthy component makes the process unready.
    #[default]
    Critical,

    /// An unhealthy component degrades the process but does not make it unready.
    NonCritical,
}

/// A component's health at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// Component name.
    pub name: String,
    /// False only while the circuit breaker is open.
    pub healthy: bool,
    /// Breaker state label (`closed`, `open`, `half-open`), or `none` without a breaker.
    pub state: &'static str,
    /// Declared criticality.
    pub criticality: Criticality,
}

/// Anything that can report its own health.
pub trait HealthReporter: Send + Sync {
    /// Component name.
    fn name(&self) -> &str;

    /// Current health.
    fn health(&self) -> HealthStatus;

    /// Components this one depends on. Pure metadata; nothing here aggregates it.
    fn dependencies(&self) -> Vec<Arc<dyn HealthReporter>> {
        Vec::new()
    }
}

/// A collection of health reporters, such as a readiness endpoint's backing store.
pub trait HealthRegistry: Send + Sync {
    /// Adds a reporter.
    fn register(&self, reporter: Arc<dyn HealthReporter>);
}

/// The health view of one policy.
pub(crate) struct PolicyHealth {
    pub(crate) name: Arc<str>,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) criticality: Criticality,
    pub(crate) dependencies: Vec<Arc<dyn HealthReporter>>,
}

impl HealthReporter for PolicyHealth {
    fn name(&self) -> &str {
        &self.name
    }

    fn health(&self) -> HealthStatus {
        let (healthy, state) = match &self.breaker {
            Some(breaker) => {
                let state = breaker.current_state();
                (state.is_healthy(), state.as_str())
            }
            None => (true, "none"),
        };

        HealthStatus {
            name: self.name.to_string(),
            healthy,
            state,
            criticality: self.criticality,
        }
    }

    fn dependencies(&self) -> Vec<Arc<dyn HealthReporter>> {
        self.dependencies.clone()
    }
}

impl fmt::Debug for PolicyHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyHealth")
            .field("name", &self.name)
            .field("criticality", &self.criticality)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}
