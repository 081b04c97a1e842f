use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;
use uuid::Uuid;

use courier_types::events::{Envelope, RelayEvent, ServerFrame, Topic};

use crate::relay::{EventRelay, RelayError};

pub type SubscriberId = Uuid;

/// One published event as seen by a subscriber. The gateway frame is encoded
/// once at publish time and shared by every recipient.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub frame: String,
}

/// In-process event relay: topic registry plus fan-out.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    /// Per-subscriber delivery channel: subscriber -> sender
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Arc<Delivery>>>,

    /// Topic membership: topic -> subscribers
    topics: HashMap<Topic, HashSet<SubscriberId>>,
}

impl Registry {
    fn remove_from_topic(&mut self, topic: &Topic, subscriber: SubscriberId) -> bool {
        let Some(members) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = members.remove(&subscriber);
        if members.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register a subscriber. All topics it later subscribes to are delivered
    /// through the returned receiver.
    pub async fn connect(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Arc<Delivery>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.registry.lock().await.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Returns false if the subscriber is unknown (already disconnected).
    pub async fn subscribe(&self, subscriber: SubscriberId, topic: Topic) -> bool {
        let mut registry = self.inner.registry.lock().await;
        if !registry.subscribers.contains_key(&subscriber) {
            return false;
        }
        registry.topics.entry(topic).or_default().insert(subscriber);
        true
    }

    /// Returns true if the subscriber was subscribed to the topic.
    pub async fn unsubscribe(&self, subscriber: SubscriberId, topic: Topic) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .remove_from_topic(&topic, subscriber)
    }

    /// Drop a subscriber and every topic registration it holds.
    pub async fn disconnect(&self, subscriber: SubscriberId) {
        let mut registry = self.inner.registry.lock().await;
        registry.subscribers.remove(&subscriber);
        registry.topics.retain(|_, members| {
            members.remove(&subscriber);
            !members.is_empty()
        });
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .registry
            .lock()
            .await
            .topics
            .get(&topic)
            .map_or(0, HashSet::len)
    }

    /// Fan an event out to the topic's current subscribers. Returns how many
    /// received it.
    ///
    /// The registry lock is held for the whole fan-out, so concurrent
    /// publishers are serialized and every subscriber of a topic observes the
    /// same relative order.
    pub async fn dispatch(&self, topic: Topic, event: RelayEvent) -> Result<usize, RelayError> {
        let kind = event.kind();
        let envelope = Envelope { topic, event };
        let frame = serde_json::to_string(&ServerFrame::Event(envelope.clone()))
            .map_err(|source| RelayError::Encode { kind, source })?;
        let delivery = Arc::new(Delivery { envelope, frame });

        let mut registry = self.inner.registry.lock().await;
        let Some(members) = registry.topics.get(&topic) else {
            return Ok(0);
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for subscriber in members {
            match registry.subscribers.get(subscriber) {
                Some(tx) if tx.send(delivery.clone()).is_ok() => delivered += 1,
                _ => closed.push(*subscriber),
            }
        }

        // Receivers that went away without disconnecting
        for subscriber in closed {
            registry.subscribers.remove(&subscriber);
            registry.remove_from_topic(&topic, subscriber);
        }

        debug!("{} on {} delivered to {} subscribers", kind, topic, delivered);
        Ok(delivered)
    }
}

#[async_trait]
impl EventRelay for Dispatcher {
    async fn publish(&self, topic: Topic, event: RelayEvent) -> Result<(), RelayError> {
        self.dispatch(topic, event).await.map(|_| ())
    }
}
