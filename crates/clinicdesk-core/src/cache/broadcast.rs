use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Name of the channel cache contexts publish on.
pub const CHANNEL_NAME: &str = "cache-sync";

/// Default number of buffered messages before slow subscribers lag.
pub const DEFAULT_CAPACITY: usize = 64;

/// Identifies one cache context (the analog of a browser tab).
pub type ContextId = u64;

/// Message published when a context refreshes a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CacheMessage {
    #[serde(rename_all = "camelCase")]
    CacheUpdated {
        data_type: String,
        item_count: usize,
        /// Epoch milliseconds
        timestamp: i64,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub origin: ContextId,
    pub message: CacheMessage,
}

/// Best-effort publish channel shared by cache contexts.
///
/// Delivery is at-most-once and unordered across contexts: a subscriber
/// that falls more than `capacity` messages behind skips the backlog, and
/// messages posted while nobody listens are dropped.
#[derive(Debug)]
pub struct BroadcastHub {
    name: String,
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self::named(CHANNEL_NAME, capacity)
    }

    pub fn named(name: &str, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            name: name.to_string(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn post(&self, origin: ContextId, message: CacheMessage) {
        match self.tx.send(Envelope { origin, message }) {
            Ok(receivers) => {
                debug!(channel = %self.name, origin, receivers, "Posted cache message");
            }
            Err(_) => {
                trace!(channel = %self.name, "No listeners for cache message");
            }
        }
    }

    pub(crate) fn receiver(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
