//! Short-window sharing of identical in-flight reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::executor::Reply;
use crate::Result;

pub(crate) type SharedRead = Shared<BoxFuture<'static, Result<Reply>>>;

struct PendingRead {
    id: u64,
    started_at: Instant,
    future: SharedRead,
}

/// Pending reads keyed by fully-qualified URL.
#[derive(Default)]
pub(crate) struct DedupCache {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, PendingRead>>,
}

impl DedupCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the shared future for `key`, and whether it was already
    /// in flight.
    ///
    /// An entry younger than `window` is reused. Otherwise `start` builds a
    /// new call which replaces any older entry and evicts itself when it
    /// settles, unless it has been replaced in the meantime.
    pub(crate) fn join<F>(
        self: &Arc<Self>,
        key: &str,
        window: Duration,
        start: F,
    ) -> (SharedRead, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<Reply>>,
    {
        let mut entries = self.entries.lock();
        if let Some(pending) = entries.get(key) {
            if pending.started_at.elapsed() < window {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %key, "joining in-flight read");

                return (pending.future.clone(), true);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cache: Weak<Self> = Arc::downgrade(self);
        let owned_key = key.to_owned();
        let call = start();
        let future = async move {
            let outcome = call.await;
            if let Some(cache) = cache.upgrade() {
                cache.evict(&owned_key, id);
            }
            outcome
        }
        .boxed()
        .shared();

        entries.insert(
            key.to_owned(),
            PendingRead {
                id,
                started_at: Instant::now(),
                future: future.clone(),
            },
        );
        (future, false)
    }

    /// Removes every entry at least `ttl` old as of `now`.
    /// Returns how many were removed.
    pub(crate) fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, pending| now.saturating_duration_since(pending.started_at) < ttl);
        let removed = before - entries.len();

        #[cfg(feature = "tracing")]
        if removed > 0 {
            tracing::trace!(removed, "swept stale pending reads");
        }

        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn evict(&self, key: &str, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|pending| pending.id == id) {
            entries.remove(key);
        }
    }
}

/// Sweeps `cache` until it is dropped.
///
/// `schedule` returns the current `(interval, ttl)` and is read again on
/// every tick and whenever `reschedule` is notified, so a reconfigured
/// context takes effect without restarting the task. Returning `None` stops
/// the sweeper.
pub(crate) fn spawn_sweeper<S>(
    cache: Weak<DedupCache>,
    reschedule: Arc<Notify>,
    schedule: S,
) -> Option<tokio::task::JoinHandle<()>>
where
    S: Fn() -> Option<(Duration, Duration)> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    Some(runtime.spawn(async move {
        while let Some((interval, ttl)) = schedule() {
            tokio::select! {
                _ = reschedule.notified() => continue,
                _ = tokio::time::sleep(interval) => {}
            }
            let Some(cache) = cache.upgrade() else {
                break;
            };
            cache.sweep(Instant::now(), ttl);
        }
    }))
}
