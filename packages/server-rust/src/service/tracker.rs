//! In-flight work tracking for container stability checks.
//!
//! Every scheduled step and every running lifecycle hook holds an
//! [`InFlightGuard`]. The container is stable when the counter is zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub(crate) struct InFlightTracker {
    in_flight: Arc<AtomicU64>,
}

impl InFlightTracker {
    /// Increments the counter; it is decremented when the guard drops, even
    /// while unwinding from a panicking hook.
    #[must_use]
    pub(crate) fn guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no work is in flight. Returns `false` on timeout.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[derive(Debug)]
pub(crate) struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_increments_and_decrements() {
        let tracker = InFlightTracker::default();
        let first = tracker.guard();
        let second = tracker.guard();
        assert_eq!(tracker.count(), 2);
        drop(first);
        assert_eq!(tracker.count(), 1);
        drop(second);
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_when_guards_drop() {
        let tracker = InFlightTracker::default();
        let guard = tracker.guard();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(tracker.wait_idle(Duration::from_secs(5)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_idle_times_out() {
        let tracker = InFlightTracker::default();
        let _guard = tracker.guard();
        assert!(!tracker.wait_idle(Duration::from_millis(30)).await);
    }
}
