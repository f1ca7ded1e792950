//! Policy options and the builder that applies them.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::health::{Criticality, HealthRegistry, HealthReporter};
use crate::hook::Hooks;
use crate::policy::Policy;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;

/// One unit of policy configuration.
///
/// Options are applied in order. Each variant writes one slot and a later option for the same
/// slot replaces the earlier one, except [`PolicyOption::DependsOn`], which accumulates.
/// Options built from configuration files and options written in code are the same values.
pub enum PolicyOption<T, E> {
    /// Bound the whole call's wall-clock time.
    Timeout(Duration),
    /// Retry failed attempts.
    Retry(RetryConfig<E>),
    /// Guard calls with a circuit breaker.
    CircuitBreaker(CircuitBreakerConfig),
    /// Limit concurrent calls to this many.
    Bulkhead(usize),
    /// Limit call throughput.
    RateLimit(RateLimitConfig),
    /// Launch a speculative duplicate after this delay.
    Hedge(Duration),
    /// Return this value instead of any error.
    Fallback(T),
    /// Observe lifecycle events.
    Hooks(Arc<Hooks>),
    /// Criticality reported in health status.
    Criticality(Criticality),
    /// Declare a dependency for health metadata.
    DependsOn(Arc<dyn HealthReporter>),
    /// Register the policy's health reporter with this registry on construction.
    Registry(Arc<dyn HealthRegistry>),
}

impl<T, E> PolicyOption<T, E> {
    /// Short name of the slot this option writes.
    pub fn slot(&self) -> &'static str {
        match self {
            PolicyOption::Timeout(_) => "timeout",
            PolicyOption::Retry(_) => "retry",
            PolicyOption::CircuitBreaker(_) => "circuit-breaker",
            PolicyOption::Bulkhead(_) => "bulkhead",
            PolicyOption::RateLimit(_) => "rate-limit",
            PolicyOption::Hedge(_) => "hedge",
            PolicyOption::Fallback(_) => "fallback",
            PolicyOption::Hooks(_) => "hooks",
            PolicyOption::Criticality(_) => "criticality",
            PolicyOption::DependsOn(_) => "depends-on",
            PolicyOption::Registry(_) => "registry",
        }
    }
}

impl<T, E> fmt::Debug for PolicyOption<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PolicyOption").field(&self.slot()).finish()
    }
}

impl<T, E> From<RetryConfig<E>> for PolicyOption<T, E> {
    fn from(config: RetryConfig<E>) -> Self {
        PolicyOption::Retry(config)
    }
}

impl<T, E> From<CircuitBreakerConfig> for PolicyOption<T, E> {
    fn from(config: CircuitBreakerConfig) -> Self {
        PolicyOption::CircuitBreaker(config)
    }
}

impl<T, E> From<RateLimitConfig> for PolicyOption<T, E> {
    fn from(config: RateLimitConfig) -> Self {
        PolicyOption::RateLimit(config)
    }
}

impl<T, E> From<Hooks> for PolicyOption<T, E> {
    fn from(hooks: Hooks) -> Self {
        PolicyOption::Hooks(Arc::new(hooks))
    }
}

/// Configuration slots, filled by applying options in order.
pub(crate) struct PolicyConfig<T, E> {
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: Option<RetryConfig<E>>,
    pub(crate) circuit_breaker: Option<CircuitBreakerConfig>,
    pub(crate) bulkhead: Option<usize>,
    pub(crate) rate_limit: Option<RateLimitConfig>,
    pub(crate) hedge: Option<Duration>,
    pub(crate) fallback: Option<T>,
    pub(crate) hooks: Option<Arc<Hooks>>,
    pub(crate) criticality: Criticality,
    pub(crate) dependencies: Vec<Arc<dyn HealthReporter>>,
    pub(crate) registry: Option<Arc<dyn HealthRegistry>>,
}

impl<T, E> Default for PolicyConfig<T, E> {
    fn default() -> Self {
        Self {
            timeout: None,
            retry: None,
            circuit_breaker: None,
            bulkhead: None,
            rate_limit: None,
            hedge: None,
            fallback: None,
            hooks: None,
            criticality: Criticality::default(),
            dependencies: Vec::new(),
            registry: None,
        }
    }
}

impl<T, E> PolicyConfig<T, E> {
    pub(crate) fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = PolicyOption<T, E>>,
    {
        let mut config = Self::default();
        for option in options {
            config.apply(option);
        }
        config
    }

    fn apply(&mut self, option: PolicyOption<T, E>) {
        match option {
            PolicyOption::Timeout(after) => self.timeout = Some(after),
            PolicyOption::Retry(retry) => self.retry = Some(retry),
            PolicyOption::CircuitBreaker(breaker) => self.circuit_breaker = Some(breaker),
            PolicyOption::Bulkhead(capacity) => self.bulkhead = Some(capacity),
            PolicyOption::RateLimit(limit) => self.rate_limit = Some(limit),
            PolicyOption::Hedge(delay) => self.hedge = Some(delay),
            PolicyOption::Fallback(value) => self.fallback = Some(value),
            PolicyOption::Hooks(hooks) => self.hooks = Some(hooks),
            PolicyOption::Criticality(criticality) => self.criticality = criticality,
            PolicyOption::DependsOn(dependency) => self.dependencies.push(dependency),
            PolicyOption::Registry(registry) => self.registry = Some(registry),
        }
    }
}

/// Builder for creating policies with custom configurations.
///
/// Every method appends one [`PolicyOption`]; [`PolicyBuilder::build`] applies them in the
/// order they were added, exactly like [`Policy::new`].
pub struct PolicyBuilder<T, E> {
    name: String,
    options: Vec<PolicyOption<T, E>>,
}

impl<T, E> PolicyBuilder<T, E>
where
    T: Clone + Send + Sync,
    E: Error + Send + Sync + 'static,
{
    /// Creates a builder for a policy called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    /// Appends an option built elsewhere, for example from a configuration file.
    pub fn option(mut self, option: impl Into<PolicyOption<T, E>>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Appends several options, in order.
    pub fn options<I>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = PolicyOption<T, E>>,
    {
        self.options.extend(options);
        self
    }

    /// Bounds the total duration of each call.
    pub fn timeout(self, after: Duration) -> Self {
        self.option(PolicyOption::Timeout(after))
    }

    /// Retries failed attempts.
    pub fn retry(self, config: RetryConfig<E>) -> Self {
        self.option(PolicyOption::Retry(config))
    }

    /// Guards calls with a circuit breaker.
    pub fn circuit_breaker(self, config: CircuitBreakerConfig) -> Self {
        self.option(PolicyOption::CircuitBreaker(config))
    }

    /// Limits concurrent calls.
    pub fn bulkhead(self, capacity: usize) -> Self {
        self.option(PolicyOption::Bulkhead(capacity))
    }

    /// Admits at most `per_second` calls per second.
    pub fn rate_limit(self, per_second: u32) -> Self {
        self.option(PolicyOption::RateLimit(RateLimitConfig::per_second(per_second)))
    }

    /// Limits call throughput with a custom bucket.
    pub fn rate_limit_with(self, config: RateLimitConfig) -> Self {
        self.option(PolicyOption::RateLimit(config))
    }

    /// Launches one speculative duplicate if the primary runs longer than `delay`.
    pub fn hedge(self, delay: Duration) -> Self {
        self.option(PolicyOption::Hedge(delay))
    }

    /// Returns `value` instead of any error.
    pub fn fallback(self, value: T) -> Self {
        self.option(PolicyOption::Fallback(value))
    }

    /// Sets the lifecycle hooks.
    pub fn hooks(self, hooks: Hooks) -> Self {
        self.option(PolicyOption::Hooks(Arc::new(hooks)))
    }

    /// Sets the lifecycle hooks, shared with other policies.
    pub fn shared_hooks(self, hooks: Arc<Hooks>) -> Self {
        self.option(PolicyOption::Hooks(hooks))
    }

    /// Sets the criticality reported in health status.
    pub fn criticality(self, criticality: Criticality) -> Self {
        self.option(PolicyOption::Criticality(criticality))
    }

    /// Declares a dependency for health metadata.
    pub fn depends_on(self, dependency: Arc<dyn HealthReporter>) -> Self {
        self.option(PolicyOption::DependsOn(dependency))
    }

    /// Registers the policy with `registry` once built.
    pub fn registry(self, registry: Arc<dyn HealthRegistry>) -> Self {
        self.option(PolicyOption::Registry(registry))
    }

    /// Builds the policy.
    pub fn build(self) -> Result<Policy<T, E>, ConfigError> {
        Policy::new(self.name, self.options)
    }
}
