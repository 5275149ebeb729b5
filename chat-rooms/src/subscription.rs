//! Broadcast primitive for room events
//!
//! A multi-producer, multi-consumer broadcast used for room status changes,
//! per-contributor discontinuities and channel state-change streams. Each
//! subscriber picks its own buffering policy: unbounded, or bounded with
//! drop-oldest on overflow.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Buffering policy for a single subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingPolicy {
    /// Queue every event until consumed.
    Unbounded,
    /// Keep at most `n` pending events; the oldest are dropped on overflow.
    Bounded(usize),
}

/// A unique, time-ordered subscription identifier based on UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

enum SlotSender<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(broadcast::Sender<T>),
}

type Registry<T> = Mutex<HashMap<SubscriptionId, SlotSender<T>>>;

fn registry_lock<T>(registry: &Registry<T>) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, SlotSender<T>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broadcasts events to any number of subscribers.
///
/// `emit` is synchronous: events are enqueued into every live subscriber's
/// queue before the call returns, so emissions from one producer are always
/// observed in emission order.
pub struct Emitter<T> {
    slots: Arc<Registry<T>>,
}

impl<T: Clone + Send + 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new subscriber with the given buffering policy.
    pub fn subscribe(&self, policy: BufferingPolicy) -> Subscription<T> {
        let id = SubscriptionId::new();
        let receiver = match policy {
            BufferingPolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                registry_lock(&self.slots).insert(id, SlotSender::Unbounded(tx));
                SubscriptionReceiver::Unbounded(rx)
            }
            BufferingPolicy::Bounded(capacity) => {
                let (tx, rx) = broadcast::channel(capacity.max(1));
                registry_lock(&self.slots).insert(id, SlotSender::Bounded(tx));
                SubscriptionReceiver::Bounded(rx)
            }
        };
        Subscription {
            id,
            slots: Arc::downgrade(&self.slots),
            receiver,
        }
    }

    /// Deliver an event to every current subscriber.
    pub fn emit(&self, event: T) {
        let slots = registry_lock(&self.slots);
        for sender in slots.values() {
            match sender {
                // A send error means the consumer side is gone; the slot is
                // cleaned up when the subscription unsubscribes or drops.
                SlotSender::Unbounded(tx) => {
                    let _ = tx.send(event.clone());
                }
                SlotSender::Bounded(tx) => {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        registry_lock(&self.slots).len()
    }
}

impl<T: Clone + Send + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

enum SubscriptionReceiver<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(broadcast::Receiver<T>),
}

/// A consumer handle: a lazy sequence of events emitted after it was created.
///
/// Dropping the subscription unsubscribes it; `unsubscribe` is idempotent and
/// later emissions are not delivered.
pub struct Subscription<T> {
    id: SubscriptionId,
    slots: Weak<Registry<T>>,
    receiver: SubscriptionReceiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event, or `None` once the emitter is gone and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        match &mut self.receiver {
            SubscriptionReceiver::Unbounded(rx) => rx.recv().await,
            SubscriptionReceiver::Bounded(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        tracing::debug!(dropped, "subscriber lagged; oldest events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Stop receiving events. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(slots) = self.slots.upgrade() {
            registry_lock(&slots).remove(&self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            registry_lock(&slots).remove(&self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
