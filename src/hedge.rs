//! Speculative duplicate attempts for tail-latency reduction.

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use futures::future::{select, Either};
use tokio_util::sync::CancellationToken;

use crate::error::PolicyResult;
use crate::hook::Events;

/// Races a delayed second attempt against a slow primary.
///
/// At most one hedge is launched per call. The first attempt to finish, success or error,
/// decides the result; the other attempt's token is cancelled and its future dropped.
pub struct Hedge {
    delay: Duration,
    events: Events,
}

impl Hedge {
    pub(crate) fn new(delay: Duration, events: Events) -> Self {
        Self { delay, events }
    }

    pub(crate) async fn execute<T, E, F, Fut>(&self, cx: &CancellationToken, op: F) -> PolicyResult<T, E>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        let primary_token = cx.child_token();
        let primary = pin!(op(primary_token.clone()));
        let timer = pin!(tokio::time::sleep(self.delay));

        let primary = match select(primary, timer).await {
            Either::Left((result, _timer)) => return result,
            Either::Right(((), primary)) => primary,
        };

        if cx.is_cancelled() {
            return primary.await;
        }

        self.events.hedge_triggered(self.delay);
        let hedge_token = cx.child_token();
        let hedge = pin!(op(hedge_token.clone()));

        match select(primary, hedge).await {
            Either::Left((result, _hedge)) => {
                hedge_token.cancel();
                result
            }
            Either::Right((result, _primary)) => {
                primary_token.cancel();
                self.events.hedge_won();
                result
            }
        }
    }
}
