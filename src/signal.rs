//! Payload-free, topic-addressed notifications.
//!
//! The executor publishes [`UNAUTHORIZED_TOPIC`] whenever the server answers
//! 401, so any UI layer can force a re-login.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Topic published when the session credential is rejected.
pub const UNAUTHORIZED_TOPIC: &str = "auth:unauthorized";

const TOPIC_CAPACITY: usize = 16;

/// Fire-and-forget publish side of a signal bus.
pub trait SignalBus: Send + Sync {
    fn publish(&self, topic: &str);
}

/// [`SignalBus`] backed by one `tokio::sync::broadcast` channel per topic.
#[derive(Debug, Default)]
pub struct BroadcastBus {
    topics: Mutex<HashMap<String, broadcast::Sender<()>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic`. Only signals published after this call are seen.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<()> {
        self.topics
            .lock()
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}

impl SignalBus for BroadcastBus {
    fn publish(&self, topic: &str) {
        let topics = self.topics.lock();
        if let Some(sender) = topics.get(topic) {
            // No receivers is not an error for a fire-and-forget signal.
            let _ = sender.send(());
        }
    }
}
