//! Deadline enforcement for whole calls and single attempts.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{PolicyError, PolicyResult};
use crate::hook::Events;

/// Bounds the total wall-clock time of everything nested inside it.
pub struct Timeout {
    after: Duration,
    events: Events,
}

impl Timeout {
    pub(crate) fn new(after: Duration, events: Events) -> Self {
        Self { after, events }
    }

    pub(crate) async fn execute<T, E, F, Fut>(&self, cx: &CancellationToken, op: F) -> PolicyResult<T, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        match within(self.after, cx, op).await {
            Some(result) => result,
            None => {
                self.events.timeout(self.after);
                Err(PolicyError::Timeout)
            }
        }
    }
}

/// Runs `op` under a child of `cx` and gives up after `after`.
///
/// On expiry the child token is cancelled and the operation's future dropped; `None` is
/// returned so the caller can report the timeout its own way.
pub(crate) async fn within<T, E, F, Fut>(
    after: Duration,
    cx: &CancellationToken,
    op: F,
) -> Option<PolicyResult<T, E>>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = PolicyResult<T, E>>,
{
    let child = cx.child_token();
    match tokio::time::timeout(after, op(child.clone())).await {
        Ok(result) => Some(result),
        Err(_elapsed) => {
            child.cancel();
            None
        }
    }
}
