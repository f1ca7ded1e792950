//! Lifecycle hooks for policy events.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;

type HookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;
type ErrorHookFn = Arc<dyn Fn(&str, &(dyn Error + 'static)) + Send + Sync + 'static>;
type RetryHookFn = Arc<dyn Fn(&str, u32, &(dyn Error + 'static)) + Send + Sync + 'static>;

static NO_HOOKS: Lazy<Arc<Hooks>> = Lazy::new(|| Arc::new(Hooks::new()));

/// Optional observer callbacks, one per lifecycle event.
///
/// Every callback receives the name of the policy that emitted the event. Unset callbacks are
/// skipped. Hooks run synchronously on the calling task, in the order the events happen, so
/// they must be cheap and safe to invoke concurrently.
///
/// ```rust
/// use resilience_rs::Hooks;
///
/// let hooks = Hooks::new()
///     .on_retry(|policy, attempt, cause| eprintln!("{policy}: attempt {attempt} failed: {cause}"))
///     .on_circuit_open(|policy| eprintln!("{policy}: circuit opened"));
/// ```
#[derive(Default, Clone)]
pub struct Hooks {
    on_retry: Option<RetryHookFn>,
    on_circuit_open: Option<HookFn>,
    on_circuit_half_open: Option<HookFn>,
    on_circuit_close: Option<HookFn>,
    on_rate_limited: Option<HookFn>,
    on_bulkhead_full: Option<HookFn>,
    on_bulkhead_acquired: Option<HookFn>,
    on_bulkhead_released: Option<HookFn>,
    on_timeout: Option<HookFn>,
    on_hedge_triggered: Option<HookFn>,
    on_hedge_won: Option<HookFn>,
    on_fallback_used: Option<ErrorHookFn>,
}

impl Hooks {
    /// Creates an empty set of hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called before each retry with the number of the attempt that failed and its error.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u32, &(dyn Error + 'static)) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Called when the circuit breaker opens.
    pub fn on_circuit_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_circuit_open = Some(Arc::new(f));
        self
    }

    /// Called when the circuit breaker half-opens.
    pub fn on_circuit_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_circuit_half_open = Some(Arc::new(f));
        self
    }

    /// Called when the circuit breaker closes again.
    pub fn on_circuit_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_circuit_close = Some(Arc::new(f));
        self
    }

    /// Called when a call is rejected by the rate limiter.
    pub fn on_rate_limited<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_rate_limited = Some(Arc::new(f));
        self
    }

    /// Called when a call is rejected because every bulkhead slot is taken.
    pub fn on_bulkhead_full<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_bulkhead_full = Some(Arc::new(f));
        self
    }

    /// Called when a call takes a bulkhead slot.
    pub fn on_bulkhead_acquired<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_bulkhead_acquired = Some(Arc::new(f));
        self
    }

    /// Called when a call gives its bulkhead slot back.
    pub fn on_bulkhead_released<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_bulkhead_released = Some(Arc::new(f));
        self
    }

    /// Called when the timeout layer's deadline is reached.
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    /// Called when a hedge attempt is launched.
    pub fn on_hedge_triggered<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_hedge_triggered = Some(Arc::new(f));
        self
    }

    /// Called when the hedge attempt finishes before the primary.
    pub fn on_hedge_won<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_hedge_won = Some(Arc::new(f));
        self
    }

    /// Called with the suppressed error when the fallback value is returned.
    pub fn on_fallback_used<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &(dyn Error + 'static)) + Send + Sync + 'static,
    {
        self.on_fallback_used = Some(Arc::new(f));
        self
    }

    pub(crate) fn none() -> Arc<Hooks> {
        Arc::clone(&NO_HOOKS)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_retry", &self.on_retry.is_some())
            .field("on_circuit_open", &self.on_circuit_open.is_some())
            .field("on_circuit_half_open", &self.on_circuit_half_open.is_some())
            .field("on_circuit_close", &self.on_circuit_close.is_some())
            .field("on_rate_limited", &self.on_rate_limited.is_some())
            .field("on_bulkhead_full", &self.on_bulkhead_full.is_some())
            .field("on_bulkhead_acquired", &self.on_bulkhead_acquired.is_some())
            .field("on_bulkhead_released", &self.on_bulkhead_released.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_hedge_triggered", &self.on_hedge_triggered.is_some())
            .field("on_hedge_won", &self.on_hedge_won.is_some())
            .field("on_fallback_used", &self.on_fallback_used.is_some())
            .finish()
    }
}

fn fire(hook: &Option<HookFn>, policy: &str) {
    if let Some(hook) = hook {
        hook(policy);
    }
}

/// Emits one lifecycle event as a log record followed by the matching hook.
///
/// Every component of a policy holds a clone; all clones share the policy name and hooks.
#[derive(Clone)]
pub(crate) struct Events {
    policy: Arc<str>,
    hooks: Arc<Hooks>,
}

impl Events {
    pub(crate) fn new(policy: Arc<str>, hooks: Arc<Hooks>) -> Self {
        Self { policy, hooks }
    }

    #[cfg(test)]
    pub(crate) fn silent(policy: &str) -> Self {
        Self::new(Arc::from(policy), Hooks::none())
    }

    pub(crate) fn retry(&self, attempt: u32, cause: &(dyn Error + 'static)) {
        tracing::debug!(policy = %self.policy, attempt, error = %cause, "attempt failed, retrying");
        if let Some(hook) = &self.hooks.on_retry {
            hook(&self.policy, attempt, cause);
        }
    }

    pub(crate) fn circuit_open(&self) {
        tracing::warn!(policy = %self.policy, "circuit breaker opened");
        fire(&self.hooks.on_circuit_open, &self.policy);
    }

    pub(crate) fn circuit_half_open(&self) {
        tracing::info!(policy = %self.policy, "circuit breaker half-open, admitting probes");
        fire(&self.hooks.on_circuit_half_open, &self.policy);
    }

    pub(crate) fn circuit_close(&self) {
        tracing::info!(policy = %self.policy, "circuit breaker closed");
        fire(&self.hooks.on_circuit_close, &self.policy);
    }

    pub(crate) fn circuit_rejected(&self) {
        tracing::debug!(policy = %self.policy, "call rejected, circuit open");
    }

    pub(crate) fn rate_limited(&self) {
        tracing::debug!(policy = %self.policy, "call rejected, rate limit exceeded");
        fire(&self.hooks.on_rate_limited, &self.policy);
    }

    pub(crate) fn bulkhead_full(&self) {
        tracing::debug!(policy = %self.policy, "call rejected, bulkhead full");
        fire(&self.hooks.on_bulkhead_full, &self.policy);
    }

    pub(crate) fn bulkhead_acquired(&self) {
        tracing::trace!(policy = %self.policy, "bulkhead slot acquired");
        fire(&self.hooks.on_bulkhead_acquired, &self.policy);
    }

    pub(crate) fn bulkhead_released(&self) {
        tracing::trace!(policy = %self.policy, "bulkhead slot released");
        fire(&self.hooks.on_bulkhead_released, &self.policy);
    }

    pub(crate) fn timeout(&self, after: Duration) {
        tracing::warn!(policy = %self.policy, timeout = ?after, "call timed out");
        fire(&self.hooks.on_timeout, &self.policy);
    }

    pub(crate) fn attempt_timeout(&self, attempt: u32, after: Duration) {
        tracing::debug!(
            policy = %self.policy,
            attempt,
            timeout = ?after,
            "attempt timed out"
        );
    }

    pub(crate) fn hedge_triggered(&self, after: Duration) {
        tracing::debug!(policy = %self.policy, delay = ?after, "launching hedge attempt");
        fire(&self.hooks.on_hedge_triggered, &self.policy);
    }

    pub(crate) fn hedge_won(&self) {
        tracing::debug!(policy = %self.policy, "hedge attempt won");
        fire(&self.hooks.on_hedge_won, &self.policy);
    }

    pub(crate) fn fallback_used(&self, cause: &(dyn Error + 'static)) {
        tracing::info!(policy = %self.policy, error = %cause, "returning fallback value");
        if let Some(hook) = &self.hooks.on_fallback_used {
            hook(&self.policy, cause);
        }
    }
}
