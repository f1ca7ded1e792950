//! Non-blocking concurrency limiter.

use std::future::Future;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{ConfigError, PolicyError, PolicyResult};
use crate::hook::Events;

/// Caps the number of calls in flight through one policy.
///
/// Admission never waits: a call that finds every slot taken is rejected with
/// [`PolicyError::BulkheadFull`] and the wrapped function is not invoked.
pub struct Bulkhead {
    capacity: usize,
    slots: Semaphore,
    events: Events,
}

impl Bulkhead {
    pub(crate) fn new(capacity: usize, events: Events) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::CapacityTooLarge {
                capacity,
                max: Semaphore::MAX_PERMITS,
            });
        }
        Ok(Self {
            capacity,
            slots: Semaphore::new(capacity),
            events,
        })
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub(crate) async fn execute<T, E, Fut>(&self, op: Fut) -> PolicyResult<T, E>
    where
        Fut: Future<Output = PolicyResult<T, E>>,
    {
        let _slot = match self.slots.try_acquire() {
            Ok(permit) => {
                self.events.bulkhead_acquired();
                Slot {
                    _permit: permit,
                    events: &self.events,
                }
            }
            Err(_) => {
                self.events.bulkhead_full();
                return Err(PolicyError::BulkheadFull);
            }
        };

        op.await
    }
}

/// A held slot. Released on drop, so every exit path (including unwinding and cancellation)
/// gives it back.
struct Slot<'a> {
    _permit: SemaphorePermit<'a>,
    events: &'a Events,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.events.bulkhead_released();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Never;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            Bulkhead::new(0, Events::silent("test")),
            Err(ConfigError::ZeroCapacity)
        ));
    }

    #[test]
    fn capacity_beyond_the_semaphore_limit_is_rejected() {
        assert!(matches!(
            Bulkhead::new(usize::MAX, Events::silent("test")),
            Err(ConfigError::CapacityTooLarge { capacity: usize::MAX, .. })
        ));
        assert!(Bulkhead::new(Semaphore::MAX_PERMITS, Events::silent("test")).is_ok());
    }

    #[tokio::test]
    async fn full_bulkhead_rejects_without_invoking() {
        let bulkhead = Bulkhead::new(1, Events::silent("test")).unwrap();

        let held = bulkhead.execute(std::future::pending::<PolicyResult<(), Never>>());
        tokio::pin!(held);
        assert!(futures::poll!(held.as_mut()).is_pending());
        assert_eq!(bulkhead.in_flight(), 1);

        let mut invoked = false;
        let result: PolicyResult<(), Never> = bulkhead
            .execute(async {
                invoked = true;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PolicyError::BulkheadFull)));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn slot_is_released_on_error_and_on_drop() {
        let bulkhead = Bulkhead::new(1, Events::silent("test")).unwrap();

        let _: PolicyResult<(), Never> = bulkhead.execute(async { Err(PolicyError::Timeout) }).await;
        assert_eq!(bulkhead.in_flight(), 0);

        {
            let held = bulkhead.execute(std::future::pending::<PolicyResult<(), Never>>());
            tokio::pin!(held);
            assert!(futures::poll!(held.as_mut()).is_pending());
            assert_eq!(bulkhead.in_flight(), 1);
        }
        assert_eq!(bulkhead.in_flight(), 0);
    }
}
