//! Bounded, newest-first log of every call made through the client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::executor::Reply;
use crate::observer::{Observers, Subscription};
use crate::Result;

/// One logical call, as shown in diagnostics views.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Monotonic per recorder, starting at 1.
    pub id: u64,
    pub method: String,
    /// Fully-qualified URL, or the bare path if base URL resolution failed.
    pub url: String,
    /// Request path without its query string.
    pub path: String,
    pub query_params: Vec<(String, String)>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub request_body: Option<JsonValue>,
    pub response_body: Option<JsonValue>,
    /// The call shared the outcome of an identical read already in flight.
    pub deduplicated: bool,
}

/// Ring buffer of the most recent calls.
pub struct HistoryRecorder {
    capacity: AtomicUsize,
    next_id: AtomicU64,
    entries: Mutex<VecDeque<HistoryEntry>>,
    observers: Observers<[HistoryEntry]>,
}

impl HistoryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            observers: Observers::default(),
        }
    }

    /// Returns the recorded calls, newest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registers a listener called with the full log after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[HistoryEntry]) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }

    pub fn clear(&self) {
        let _order = self.observers.sequence();
        self.entries.lock().clear();
        self.observers.notify(&[]);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Changes how many calls are kept. Shrinking drops the oldest entries
    /// and notifies listeners.
    pub fn set_capacity(&self, capacity: usize) {
        let _order = self.observers.sequence();
        if self.capacity.swap(capacity, Ordering::Relaxed) == capacity {
            return;
        }
        let trimmed: Option<Vec<HistoryEntry>> = {
            let mut entries = self.entries.lock();
            (entries.len() > capacity).then(|| {
                entries.truncate(capacity);
                entries.iter().cloned().collect()
            })
        };
        if let Some(snapshot) = trimmed {
            self.observers.notify(&snapshot);
        }
    }

    /// Opens an entry for a call that is about to start.
    pub(crate) fn start(
        self: &Arc<Self>,
        method: &Method,
        path: &str,
        request_body: Option<&JsonValue>,
    ) -> PendingEntry {
        let entry = HistoryEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.as_str().to_owned(),
            url: path.to_owned(),
            path: path.split('?').next().unwrap_or_default().to_owned(),
            query_params: Vec::new(),
            status: None,
            error: None,
            duration_ms: 0,
            started_at: Utc::now(),
            request_body: request_body.cloned(),
            response_body: None,
            deduplicated: false,
        };
        PendingEntry {
            recorder: Arc::clone(self),
            entry: Some(entry),
            started: Instant::now(),
        }
    }

    fn append(&self, entry: HistoryEntry) {
        let _order = self.observers.sequence();
        let snapshot: Vec<HistoryEntry> = {
            let mut entries = self.entries.lock();
            entries.push_front(entry);
            entries.truncate(self.capacity());
            entries.iter().cloned().collect()
        };
        self.observers.notify(&snapshot);
    }
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new(100)
    }
}

/// An entry that is appended to the log exactly once, when it is finished
/// or dropped. A dropped, unfinished entry is logged as cancelled.
pub(crate) struct PendingEntry {
    recorder: Arc<HistoryRecorder>,
    entry: Option<HistoryEntry>,
    started: Instant,
}

impl PendingEntry {
    pub(crate) fn set_url(&mut self, url: &str) {
        let Some(entry) = self.entry.as_mut() else {
            return;
        };
        entry.url = url.to_owned();
        if let Ok(parsed) = Url::parse(url) {
            entry.query_params = parsed
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
        }
    }

    pub(crate) fn mark_deduplicated(&mut self) {
        if let Some(entry) = self.entry.as_mut() {
            entry.deduplicated = true;
        }
    }

    pub(crate) fn finish(mut self, outcome: &Result<Reply>) {
        if let Some(entry) = self.entry.as_mut() {
            match outcome {
                Ok(reply) => {
                    entry.status = Some(reply.status);
                    entry.response_body = Some(reply.body.clone());
                }
                Err(err) => {
                    entry.status = err.status();
                    entry.error = Some(err.message());
                    if let crate::ApiError::Http { body, .. } = err {
                        entry.response_body = body.clone();
                    }
                }
            }
        }
        self.commit();
    }

    fn commit(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            entry.duration_ms = self.started.elapsed().as_millis() as u64;
            self.recorder.append(entry);
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.as_mut() {
            entry.error = Some(crate::ApiError::Cancelled.message());
        }
        self.commit();
    }
}
