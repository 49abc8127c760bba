//! Count of dispatched jobs that have not finished yet
//!
//! Shutdown waits on this barrier rather than on the completion channel, so a
//! completion that races the channel teardown can never be lost.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve a slot for a job about to be spawned. The slot is released
    /// when the guard drops, including on unwind or task abort.
    pub fn acquire(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            barrier: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once no slot is held
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await still wakes us.
            notified.as_mut().enable();

            if self.len() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct InFlightGuard {
    barrier: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.barrier.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.barrier.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_when_empty() {
        let barrier = InFlight::new();
        tokio::time::timeout(Duration::from_millis(50), barrier.wait_idle())
            .await
            .expect("empty barrier should be idle");
    }

    #[tokio::test]
    async fn test_waits_for_every_guard() {
        let barrier = InFlight::new();
        let first = barrier.acquire();
        let second = barrier.acquire();
        assert_eq!(barrier.len(), 2);

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_idle().await })
        };

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake once the last guard drops")
            .unwrap();
        assert_eq!(barrier.len(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_on_panic() {
        let barrier = InFlight::new();
        let guard = barrier.acquire();

        let result = tokio::spawn(async move {
            let _guard = guard;
            panic!("job blew up");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(barrier.len(), 0);
    }
}
