//! Transport seam.
//!
//! Connection lifecycle, reconnection and QoS enforcement all live inside
//! the [`Transport`] implementation; the listener only subscribes to one
//! topic and publishes outcome documents.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::TransportError;

/// One message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// One message handed to `publish`, as a transport saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Messaging substrate the listener runs against.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to a topic, returning the stream of its messages.
    async fn subscribe(
        &self,
        topic: &str,
        qos: u8,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError>;

    /// Publish a payload.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError>;
}

/// In-process transport over tokio channels.
///
/// Messages injected with [`inject`](Self::inject) are delivered to the
/// matching subscriber; published messages are recorded for inspection and
/// looped back to a subscriber on the same topic when one exists. Used by
/// the test suite and by deployments that embed producer and consumer in
/// one process.
pub struct MemoryTransport {
    capacity: usize,
    subscribers: Mutex<HashMap<String, mpsc::Sender<InboundMessage>>>,
    published: Mutex<Vec<PublishedMessage>>,
    fail_publishes: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            fail_publishes: AtomicBool::new(false),
        }
    }

    /// Deliver a payload to the subscriber of `topic`.
    pub async fn inject(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let subscribers = self.subscribers.lock().await;
        let sender = subscribers
            .get(topic)
            .ok_or(TransportError::NotConnected)?;
        sender
            .send(InboundMessage {
                topic: topic.to_owned(),
                payload,
            })
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Snapshot of everything published so far.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Messages published to one topic.
    pub async fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Make every subsequent publish fail, for delivery-failure tests.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(
        &self,
        topic: &str,
        _qos: u8,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(topic.to_owned(), tx);
        debug!(topic, "memory transport subscription added");
        Ok(rx)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::publish(topic, "publish failure injected"));
        }

        let message = PublishedMessage {
            topic: topic.to_owned(),
            payload,
            qos,
            retain,
        };

        {
            let subscribers = self.subscribers.lock().await;
            if let Some(sender) = subscribers.get(topic) {
                // Loopback delivery is best effort; a full or dropped
                // subscriber does not fail the publish.
                let _ = sender
                    .send(InboundMessage {
                        topic: message.topic.clone(),
                        payload: message.payload.clone(),
                    })
                    .await;
            }
        }

        self.published.lock().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_messages_reach_the_subscriber() {
        let transport = MemoryTransport::new();
        let mut rx = transport.subscribe("jobs", 0).await.unwrap();

        transport.inject("jobs", b"payload".to_vec()).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "jobs");
        assert_eq!(msg.payload, b"payload");
    }

    #[tokio::test]
    async fn inject_without_subscriber_errors() {
        let transport = MemoryTransport::new();
        let err = transport.inject("jobs", Vec::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn publish_is_recorded_and_looped_back() {
        let transport = MemoryTransport::new();
        let mut rx = transport.subscribe("jobs/results", 0).await.unwrap();

        transport
            .publish("jobs/results", b"out".to_vec(), 1, true)
            .await
            .unwrap();

        let sent = transport.published_to("jobs/results").await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].qos, 1);
        assert!(sent[0].retain);

        let echoed = rx.recv().await.unwrap();
        assert_eq!(echoed.payload, b"out");
    }

    #[tokio::test]
    async fn injected_failures_surface_on_publish() {
        let transport = MemoryTransport::new();
        transport.fail_publishes(true);
        let err = transport
            .publish("jobs/results", Vec::new(), 0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Publish { .. }));

        transport.fail_publishes(false);
        assert!(transport
            .publish("jobs/results", Vec::new(), 0, false)
            .await
            .is_ok());
    }
}
