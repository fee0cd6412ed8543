use std::sync::Arc;

use parking_lot::Mutex;

use crate::observer::{Observers, Subscription};

/// Live count of mutation calls that have started but not settled.
///
/// Drives busy indicators. Listeners are invoked synchronously with the new
/// count on every change.
#[derive(Default)]
pub struct InflightTracker {
    count: Mutex<usize>,
    observers: Observers<usize>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&usize) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }

    /// Counts one mutation as started. The count is released when the
    /// returned guard is dropped, whatever the call's outcome.
    pub(crate) fn begin(self: &Arc<Self>) -> InflightGuard {
        self.adjust(|count| count + 1);
        InflightGuard {
            tracker: Arc::clone(self),
        }
    }

    fn adjust(&self, f: impl FnOnce(usize) -> usize) {
        let _order = self.observers.sequence();
        let next = {
            let mut count = self.count.lock();
            *count = f(*count);
            *count
        };
        self.observers.notify(&next);
    }
}

#[must_use = "dropping the guard immediately releases the inflight count"]
pub(crate) struct InflightGuard {
    tracker: Arc<InflightTracker>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.tracker.adjust(|count| count.saturating_sub(1));
    }
}
