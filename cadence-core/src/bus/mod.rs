//! Message bus
//!
//! Topic based publish/subscribe between the scheduler and the worker pool.
//! Delivery is at-least-once from the consumer's point of view: consumers
//! must tolerate duplicates. Every subscriber of a topic receives every
//! message published to it after subscribing.
//!
//! [`InProcessBus`] fans messages out over unbounded tokio channels. A
//! topic with no live subscriber rejects publishes with
//! [`BusError::NoSubscribers`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Errors raised by the message bus
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no subscribers for topic {0}")]
    NoSubscribers(String),

    #[error("message bus is closed")]
    Closed,

    #[error("failed to serialize message: {0}")]
    Serialization(String),
}

/// A message as delivered to subscribers
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    pub key: String,
    pub payload: JsonValue,
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    /// Decodes the payload into a typed message
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| BusError::Serialization(e.to_string()))
    }
}

/// Stream of messages for one topic
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the bus side is gone
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Next already-queued message, without waiting
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    /// Stops accepting new messages; queued ones can still be received
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes `payload` under `key` on `topic`
    async fn publish(&self, topic: &str, key: &str, payload: JsonValue) -> Result<(), BusError>;

    /// Opens a subscription to `topic`
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// Serializes and publishes a typed message
pub async fn publish_message<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    topic: &str,
    key: &str,
    message: &T,
) -> Result<(), BusError> {
    let payload =
        serde_json::to_value(message).map_err(|e| BusError::Serialization(e.to_string()))?;
    bus.publish(topic, key, payload).await
}

/// In-process bus over tokio channels
#[derive(Default)]
pub struct InProcessBus {
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    topics: HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every subscription and rejects further traffic
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.topics.clear();
    }

    /// Number of live subscribers on `topic`
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, key: &str, payload: JsonValue) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BusError::Closed);
        }

        let senders = state.topics.entry(topic.to_string()).or_default();
        senders.retain(|s| !s.is_closed());

        let envelope = Envelope {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        };

        let mut delivered = 0;
        for sender in senders.iter() {
            if sender.send(envelope.clone()).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            return Err(BusError::NoSubscribers(topic.to_string()));
        }

        debug!(topic, key, delivered, "Published message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BusError::Closed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(sender);

        Ok(Subscription::new(topic, receiver))
    }
}
