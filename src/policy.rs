//! Policy assembly and the fixed layer chain.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::bulkhead::Bulkhead;
use crate::config::{PolicyBuilder, PolicyConfig, PolicyOption};
use crate::error::{non_zero, ConfigError, PolicyResult};
use crate::fallback::Fallback;
use crate::health::{HealthReporter, HealthStatus, PolicyHealth};
use crate::hedge::Hedge;
use crate::hook::{Events, Hooks};
use crate::rate_limit::RateLimiter;
use crate::retry::Retry;
use crate::state::State;
use crate::timeout::Timeout;

/// The layers a policy can contain, declared outermost first.
///
/// The declaration order is the execution order: a policy always nests its configured layers
/// this way, whatever order the options were given in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKind {
    /// Substitutes a static value for any error.
    Fallback,
    /// Bounds total wall-clock time.
    Timeout,
    /// Fails fast while the dependency looks unhealthy.
    CircuitBreaker,
    /// Gates throughput.
    RateLimit,
    /// Caps concurrent calls.
    Bulkhead,
    /// Spends attempts.
    Retry,
    /// Races a speculative duplicate.
    Hedge,
}

impl LayerKind {
    /// Every layer, outermost first.
    pub const ORDER: [LayerKind; 7] = [
        LayerKind::Fallback,
        LayerKind::Timeout,
        LayerKind::CircuitBreaker,
        LayerKind::RateLimit,
        LayerKind::Bulkhead,
        LayerKind::Retry,
        LayerKind::Hedge,
    ];

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Fallback => "fallback",
            LayerKind::Timeout => "timeout",
            LayerKind::CircuitBreaker => "circuit-breaker",
            LayerKind::RateLimit => "rate-limit",
            LayerKind::Bulkhead => "bulkhead",
            LayerKind::Retry => "retry",
            LayerKind::Hedge => "hedge",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Layer<T, E> {
    Fallback(Fallback<T>),
    Timeout(Timeout),
    CircuitBreaker(Arc<CircuitBreaker>),
    RateLimit(RateLimiter),
    Bulkhead(Bulkhead),
    Retry(Retry<E>),
    Hedge(Hedge),
}

impl<T, E> Layer<T, E> {
    fn kind(&self) -> LayerKind {
        match self {
            Layer::Fallback(_) => LayerKind::Fallback,
            Layer::Timeout(_) => LayerKind::Timeout,
            Layer::CircuitBreaker(_) => LayerKind::CircuitBreaker,
            Layer::RateLimit(_) => LayerKind::RateLimit,
            Layer::Bulkhead(_) => LayerKind::Bulkhead,
            Layer::Retry(_) => LayerKind::Retry,
            Layer::Hedge(_) => LayerKind::Hedge,
        }
    }
}

/// The wrapped operation as seen by the layers: one boxed future per invocation.
type Op<'a, T, E> =
    dyn Fn(CancellationToken) -> BoxFuture<'a, PolicyResult<T, E>> + Send + Sync + 'a;

/// A named, reusable call wrapper composing resilience layers.
///
/// A policy is immutable once built and safe to share between any number of concurrent
/// callers (wrap it in an `Arc`). Shared state such as the breaker's state machine, bulkhead
/// slots and rate limiter tokens belongs to the policy and is protected internally.
///
/// ```rust
/// use std::time::Duration;
/// use resilience_rs::{
///     Backoff, CancellationToken, CircuitBreakerConfig, Policy, PolicyError, RetryConfig,
/// };
///
/// #[derive(Debug)]
/// struct Unavailable;
///
/// impl std::fmt::Display for Unavailable {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("unavailable")
///     }
/// }
///
/// impl std::error::Error for Unavailable {}
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = Policy::<String, Unavailable>::builder("inventory")
///     .timeout(Duration::from_secs(2))
///     .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(5))
///     .retry(RetryConfig::new(3, Backoff::exponential(Duration::from_millis(50))))
///     .fallback("cached".to_string())
///     .build()?;
///
/// let cx = CancellationToken::new();
/// let value = policy
///     .call(&cx, |_cx| async { Err(PolicyError::from(Unavailable)) })
///     .await?;
/// assert_eq!(value, "cached");
/// # Ok(())
/// # }
/// ```
pub struct Policy<T, E> {
    name: Arc<str>,
    layers: SmallVec<[Layer<T, E>; 7]>,
    breaker: Option<Arc<CircuitBreaker>>,
    hooks: Arc<Hooks>,
    health: Arc<PolicyHealth>,
}

impl<T, E> Policy<T, E>
where
    T: Clone + Send + Sync,
    E: Error + Send + Sync + 'static,
{
    /// Builds a policy by applying `options` in order.
    ///
    /// Only the layers whose options were given are created; they are always nested in the
    /// order of [`LayerKind::ORDER`]. Fails if any option is malformed.
    pub fn new<I>(name: impl Into<String>, options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = PolicyOption<T, E>>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let name: Arc<str> = Arc::from(name);
        let config = PolicyConfig::from_options(options);
        let hooks = config.hooks.unwrap_or_else(Hooks::none);
        let events = Events::new(Arc::clone(&name), Arc::clone(&hooks));

        let mut layers: SmallVec<[Layer<T, E>; 7]> = SmallVec::new();

        if let Some(retry) = config.retry {
            layers.push(Layer::Retry(Retry::new(retry, events.clone())?));
        }
        if let Some(delay) = config.hedge {
            let delay = non_zero(delay, "hedge delay")?;
            layers.push(Layer::Hedge(Hedge::new(delay, events.clone())));
        }
        if let Some(capacity) = config.bulkhead {
            layers.push(Layer::Bulkhead(Bulkhead::new(capacity, events.clone())?));
        }
        if let Some(limit) = config.rate_limit {
            layers.push(Layer::RateLimit(RateLimiter::new(limit, events.clone())?));
        }
        let breaker = match config.circuit_breaker {
            Some(breaker) => {
                breaker.validate()?;
                let breaker = Arc::new(CircuitBreaker::new(breaker, events.clone()));
                layers.push(Layer::CircuitBreaker(Arc::clone(&breaker)));
                Some(breaker)
            }
            None => None,
        };
        if let Some(after) = config.timeout {
            let after = non_zero(after, "timeout")?;
            layers.push(Layer::Timeout(Timeout::new(after, events.clone())));
        }
        if let Some(value) = config.fallback {
            layers.push(Layer::Fallback(Fallback::new(value, events)));
        }

        layers.sort_by_key(Layer::kind);

        let health = Arc::new(PolicyHealth {
            name: Arc::clone(&name),
            breaker: breaker.clone(),
            criticality: config.criticality,
            dependencies: config.dependencies,
        });
        if let Some(registry) = config.registry {
            registry.register(health.clone());
        }

        tracing::debug!(
            policy = %name,
            layers = ?layers.iter().map(Layer::kind).collect::<Vec<_>>(),
            "policy built"
        );

        Ok(Self {
            name,
            layers,
            breaker,
            hooks,
            health,
        })
    }

    /// Creates a builder for a policy called `name`.
    pub fn builder(name: impl Into<String>) -> PolicyBuilder<T, E> {
        PolicyBuilder::new(name)
    }

    /// Invokes `f` through every configured layer.
    ///
    /// `f` receives a token derived from `cx`; it may be invoked several times (retries, the
    /// hedge attempt) and must stop work when its token is cancelled. With no layers
    /// configured this is a direct call of `f`.
    pub async fn call<F, Fut>(&self, cx: &CancellationToken, f: F) -> PolicyResult<T, E>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = PolicyResult<T, E>> + Send,
    {
        let op: &Op<'_, T, E> = &|token| f(token).boxed();
        self.run(0, cx.clone(), op).await
    }

    fn run<'a>(
        &'a self,
        depth: usize,
        cx: CancellationToken,
        op: &'a Op<'a, T, E>,
    ) -> BoxFuture<'a, PolicyResult<T, E>> {
        async move {
            let Some(layer) = self.layers.get(depth) else {
                return op(cx).await;
            };
            let next = move |token: CancellationToken| self.run(depth + 1, token, op);

            match layer {
                Layer::Fallback(fallback) => fallback.execute(next(cx)).await,
                Layer::Timeout(timeout) => timeout.execute(&cx, next).await,
                Layer::CircuitBreaker(breaker) => breaker.execute(next(cx)).await,
                Layer::RateLimit(limiter) => limiter.execute(next(cx)).await,
                Layer::Bulkhead(bulkhead) => bulkhead.execute(next(cx)).await,
                Layer::Retry(retry) => retry.execute(&cx, next).await,
                Layer::Hedge(hedge) => hedge.execute(&cx, next).await,
            }
        }
        .boxed()
    }
}

impl<T, E> Policy<T, E> {
    /// The policy's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured layers in execution order, outermost first.
    pub fn layers(&self) -> Vec<LayerKind> {
        self.layers.iter().map(Layer::kind).collect()
    }

    /// The hooks this policy emits to.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Current circuit breaker state, if the policy has a breaker.
    pub fn circuit_state(&self) -> Option<State> {
        self.breaker.as_ref().map(|breaker| breaker.current_state())
    }

    /// Snapshot of the circuit breaker's counters, if the policy has a breaker.
    pub fn breaker_snapshot(&self) -> Option<BreakerSnapshot> {
        self.breaker.as_ref().map(|breaker| breaker.snapshot())
    }

    /// Number of calls holding a bulkhead slot, if the policy has a bulkhead.
    pub fn bulkhead_in_flight(&self) -> Option<usize> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Bulkhead(bulkhead) => Some(bulkhead.in_flight()),
            _ => None,
        })
    }

    /// Current health, derived from the circuit breaker.
    pub fn health(&self) -> HealthStatus {
        self.health.health()
    }

    /// A reporter for this policy's health, suitable for an external registry.
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        self.health.clone()
    }

    /// Declared dependencies.
    pub fn dependencies(&self) -> Vec<Arc<dyn HealthReporter>> {
        self.health.dependencies()
    }
}

impl<T, E> fmt::Debug for Policy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("layers", &self.layers())
            .finish()
    }
}
