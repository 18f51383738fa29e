//! State distribution bus.

use crate::diff::{diff, empty_like};
use crate::{Delivery, Error, OutboundMessage, Result, Topic, UpdateData};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Delivery callback installed by the bus owner.
pub type Transport = Arc<dyn Fn(OutboundMessage) + Send + Sync>;

/// What a call to [`StateBus::publish`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nobody listens; the producer was not invoked.
    NotSubscribed,
    /// No transport installed yet; the producer was not invoked.
    NoTransport,
    /// The producer failed; the cached value is untouched.
    ProducerFailed,
    /// The new value equals the cached one; nothing was sent.
    Unchanged,
    /// A patch with this many operations was sent.
    Delivered { operations: usize },
    /// A raw topic value was sent as-is.
    DeliveredRaw,
}

/// Last published value of a topic. `None` until the first delivery.
type CacheSlot = Arc<tokio::sync::Mutex<Option<Value>>>;

/// Ships the minimal change of each subscribed topic to one transport.
///
/// Publishes to the same topic run one at a time, in submission order:
/// the slot lock is held from cache read through cache write, producer
/// included. Different topics never wait on each other.
#[derive(Default)]
pub struct StateBus {
    subscriptions: Mutex<HashSet<Topic>>,
    cache: Mutex<HashMap<Topic, CacheSlot>>,
    transport: OnceLock<Transport>,
}

impl StateBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the delivery callback. Can be done once.
    pub fn set_transport(&self, transport: Transport) -> Result<()> {
        self.transport
            .set(transport)
            .map_err(|_| Error::TransportAlreadySet)
    }

    pub fn subscribe(&self, topic: Topic) {
        if self.subscriptions.lock().insert(topic.clone()) {
            debug!(%topic, "subscribed");
        }
    }

    /// Stop tracking a topic and forget its cached value, so a later
    /// subscriber starts from an empty baseline.
    pub fn unsubscribe(&self, topic: &Topic) {
        if self.subscriptions.lock().remove(topic) {
            self.cache.lock().remove(topic);
            debug!(%topic, "unsubscribed");
        }
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.lock().contains(topic)
    }

    pub fn subscriptions(&self) -> Vec<Topic> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Publish the value computed by `producer` under `topic`.
    ///
    /// The producer only runs when the topic is subscribed and a transport
    /// is installed. Diffed topics deliver a patch against the previous
    /// value, or nothing if it is unchanged; raw topics deliver the value
    /// itself every time. A failing producer leaves the cache as it was.
    pub async fn publish<F, Fut, T, E>(&self, topic: &Topic, producer: F) -> PublishOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        if !self.is_subscribed(topic) {
            trace!(%topic, "no subscribers, skipping producer");
            return PublishOutcome::NotSubscribed;
        }
        let Some(transport) = self.transport.get().cloned() else {
            return PublishOutcome::NoTransport;
        };

        if topic.delivery() == Delivery::Raw {
            let Some(value) = produce(topic, producer).await else {
                return PublishOutcome::ProducerFailed;
            };
            transport(OutboundMessage::push(topic.clone(), UpdateData::Full(value)));
            return PublishOutcome::DeliveredRaw;
        }

        let mut slot = self.slot(topic);
        let mut cached = Arc::clone(&slot).lock_owned().await;

        let Some(value) = produce(topic, producer).await else {
            return PublishOutcome::ProducerFailed;
        };

        // An unsubscribe while producing swaps the slot out. Rebase onto the
        // current one so a new subscriber is patched from its own baseline.
        loop {
            if !self.is_subscribed(topic) {
                return PublishOutcome::NotSubscribed;
            }
            let current = self.slot(topic);
            if Arc::ptr_eq(&current, &slot) {
                break;
            }
            debug!(%topic, "topic reset while producing, rebasing");
            drop(cached);
            slot = current;
            cached = Arc::clone(&slot).lock_owned().await;
        }

        let ops = match cached.as_ref() {
            Some(previous) => diff(previous, &value),
            None => diff(&empty_like(&value), &value),
        };
        if ops.is_empty() {
            trace!(%topic, "value unchanged");
            return PublishOutcome::Unchanged;
        }

        let operations = ops.len();
        transport(OutboundMessage::push(topic.clone(), UpdateData::Patch(ops)));
        *cached = Some(value);
        debug!(%topic, operations, "delivered patch");
        PublishOutcome::Delivered { operations }
    }

    /// Publish an already computed value.
    pub async fn publish_value<T: Serialize>(&self, topic: &Topic, value: T) -> PublishOutcome {
        self.publish(topic, || async move { Ok::<_, Infallible>(value) })
            .await
    }

    /// Last value delivered on a topic.
    pub async fn cached(&self, topic: &Topic) -> Option<Value> {
        let slot = self.cache.lock().get(topic).cloned()?;
        let value = slot.lock().await.clone();
        value
    }

    fn slot(&self, topic: &Topic) -> CacheSlot {
        self.cache
            .lock()
            .entry(topic.clone())
            .or_default()
            .clone()
    }
}

async fn produce<F, Fut, T, E>(topic: &Topic, producer: F) -> Option<Value>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    T: Serialize,
    E: Display,
{
    match producer().await {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%topic, error = %e, "failed to serialize published value");
                None
            }
        },
        Err(e) => {
            warn!(%topic, error = %e, "producer failed");
            None
        }
    }
}
