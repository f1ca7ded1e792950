//! Static fallback value.

use std::error::Error;
use std::future::Future;

use crate::error::PolicyResult;
use crate::hook::Events;

/// Replaces any error from the inner chain with a fixed value.
pub struct Fallback<T> {
    value: T,
    events: Events,
}

impl<T: Clone> Fallback<T> {
    pub(crate) fn new(value: T, events: Events) -> Self {
        Self { value, events }
    }

    pub(crate) async fn execute<E, Fut>(&self, op: Fut) -> PolicyResult<T, E>
    where
        E: Error + 'static,
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        match op.await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.events.fallback_used(&err);
                Ok(self.value.clone())
            }
        }
    }
}
