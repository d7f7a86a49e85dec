use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::SUBSCRIBER_BUFFER;
use crate::types::StreamMessage;

/// Serialized message shared by every subscriber of one publish.
pub type Payload = Arc<str>;

pub type SubscriberId = u64;

/// Receiving half handed to a connection when it registers.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Payload>,
}

/// Fan-out of stream messages to live subscribers.
///
/// Each subscriber owns a bounded queue. Publishing never waits on a
/// subscriber: a full queue or a closed receiver marks the subscriber as
/// failed, and failed subscribers are removed once the pass is complete.
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Payload>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber.
    ///
    /// `initial` is evaluated under the registry lock, and its message (if
    /// any) is queued before the subscriber becomes visible to `publish`, so
    /// it always arrives ahead of any broadcast.
    pub fn register(&self, initial: impl FnOnce() -> Option<StreamMessage>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut subscribers = self.subscribers.lock();
        if let Some(payload) = initial().and_then(|msg| encode(&msg)) {
            // fresh channel with capacity >= 1
            let _ = tx.try_send(payload);
        }
        subscribers.insert(id, tx);
        let total = subscribers.len();
        drop(subscribers);

        info!("Subscriber {id} connected. Total connections: {total}");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let removed = subscribers.remove(&id).is_some();
        let total = subscribers.len();
        drop(subscribers);

        if removed {
            info!("Subscriber {id} disconnected. Total connections: {total}");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `message` to every registered subscriber.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, message: &StreamMessage) -> usize {
        let Some(payload) = encode(message) else {
            return 0;
        };
        self.publish_payload(payload)
    }

    fn publish_payload(&self, payload: Payload) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<Payload>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {id} is not keeping up, dropping it");
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {id} channel closed");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in &failed {
                subscribers.remove(id);
            }
            warn!(
                "Pruned {} failed subscriber(s). Total connections: {}",
                failed.len(),
                subscribers.len()
            );
        }
        delivered
    }

    /// Drop every subscriber queue so their connection loops wind down.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.subscribers.lock().drain().collect();
        if !drained.is_empty() {
            info!("Closing {} subscriber(s)", drained.len());
        }
        drained.len()
    }
}

fn encode(message: &StreamMessage) -> Option<Payload> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!("Failed to serialize {:?} message: {e}", message.kind);
            None
        }
    }
}
