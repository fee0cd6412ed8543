use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::auth::TokenStore;
use crate::dedup::{spawn_sweeper, DedupCache};
use crate::history::{HistoryEntry, HistoryRecorder};
use crate::inflight::InflightTracker;
use crate::observer::Subscription;
use crate::signal::{BroadcastBus, SignalBus};
use crate::ClientOptions;

/// Shared state behind every [`ApiClient`](crate::ApiClient).
///
/// Created once by the composition root and handed to each domain service
/// by `Arc`. Owns the configuration snapshot, the pending-read cache, the
/// inflight counter and the call history.
pub struct ClientContext {
    options: Arc<RwLock<Arc<ClientOptions>>>,
    http: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
    signals: Arc<dyn SignalBus>,
    pub(crate) reads: Arc<DedupCache>,
    pub(crate) inflight: Arc<InflightTracker>,
    pub(crate) history: Arc<HistoryRecorder>,
    reschedule: Arc<Notify>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl ClientContext {
    /// Creates a context that publishes signals on a fresh [`BroadcastBus`].
    ///
    /// Inside a Tokio runtime this also starts the periodic sweep of stale
    /// pending reads.
    pub fn new(options: ClientOptions, tokens: Arc<dyn TokenStore>) -> Arc<Self> {
        Self::with_signal_bus(options, tokens, Arc::new(BroadcastBus::new()))
    }

    pub fn with_signal_bus(
        options: ClientOptions,
        tokens: Arc<dyn TokenStore>,
        signals: Arc<dyn SignalBus>,
    ) -> Arc<Self> {
        let history = Arc::new(HistoryRecorder::new(options.history_capacity));
        let options = Arc::new(RwLock::new(Arc::new(options)));
        let reads = Arc::new(DedupCache::new());
        let reschedule = Arc::new(Notify::new());

        let current = Arc::downgrade(&options);
        let sweeper = spawn_sweeper(Arc::downgrade(&reads), Arc::clone(&reschedule), move || {
            let lock = current.upgrade()?;
            let options = lock.read();
            Some((options.sweep_interval(), options.pending_ttl()))
        });

        Arc::new(Self {
            http: reqwest::Client::new(),
            history,
            options,
            tokens,
            signals,
            reads,
            inflight: Arc::new(InflightTracker::new()),
            reschedule,
            sweeper,
        })
    }

    /// Replaces the configuration. Calls already running keep the snapshot
    /// they started with. History capacity and the pending-read sweep follow
    /// the new values right away.
    pub fn configure(&self, options: ClientOptions) {
        let capacity = options.history_capacity;
        *self.options.write() = Arc::new(options);
        self.history.set_capacity(capacity);
        self.reschedule.notify_one();

        #[cfg(feature = "tracing")]
        tracing::debug!(history_capacity = capacity, "client reconfigured");
    }

    /// Current configuration snapshot.
    pub fn options(&self) -> Arc<ClientOptions> {
        Arc::clone(&self.options.read())
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn signal_bus(&self) -> &Arc<dyn SignalBus> {
        &self.signals
    }

    pub(crate) fn http_client(&self, options: &ClientOptions) -> reqwest::Client {
        options
            .http_client
            .clone()
            .unwrap_or_else(|| self.http.clone())
    }

    // ── Observability ────────────────────────────────────────────────

    /// Number of mutations currently in flight.
    pub fn inflight_count(&self) -> usize {
        self.inflight.count()
    }

    pub fn on_inflight_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&usize) + Send + Sync + 'static,
    {
        self.inflight.subscribe(listener)
    }

    pub fn off_inflight_change(&self, subscription: Subscription) -> bool {
        self.inflight.unsubscribe(subscription)
    }

    /// Recent calls, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn on_history_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[HistoryEntry]) + Send + Sync + 'static,
    {
        self.history.subscribe(listener)
    }

    pub fn off_history_change(&self, subscription: Subscription) -> bool {
        self.history.unsubscribe(subscription)
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    /// Drops pending reads older than the configured TTL right away.
    /// Returns how many were removed.
    pub fn sweep_pending_reads(&self) -> usize {
        let ttl = self.options().pending_ttl();
        self.reads.sweep(Instant::now(), ttl)
    }

    /// Number of reads currently eligible for sharing or awaiting sweep.
    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("options", &self.options())
            .field("inflight", &self.inflight.count())
            .field("history_len", &self.history.len())
            .field("pending_reads", &self.reads.len())
            .finish()
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
