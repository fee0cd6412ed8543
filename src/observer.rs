use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

/// Handle returned by a `subscribe` call; pass it back to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of change listeners, invoked synchronously on every change.
///
/// Owners hold [`Observers::sequence`] across a state change and its
/// notification, so listeners see changes in the order they were applied
/// even when they come from several threads.
pub(crate) struct Observers<T: ?Sized> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    order: ReentrantMutex<()>,
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            order: ReentrantMutex::new(()),
        }
    }
}

impl<T: ?Sized> Observers<T> {
    pub(crate) fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Returns `false` if the subscription was already removed.
    pub(crate) fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription.0);
        listeners.len() != before
    }

    /// Serializes change-then-notify sections. Reentrant, so a listener may
    /// trigger a nested change on the same thread.
    pub(crate) fn sequence(&self) -> ReentrantMutexGuard<'_, ()> {
        self.order.lock()
    }

    pub(crate) fn notify(&self, value: &T) {
        // Snapshot so listeners may (un)subscribe while being notified.
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}
