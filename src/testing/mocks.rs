//! Mock implementations for testing
//!
//! Provides an in-memory [`MessageBus`] so devices can be exercised without a broker.

use crate::transport::{BusError, MessageBus, MessageCallback, QoS};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A message recorded by [`MockBus::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}

/// Mock bus recording every publish and subscription
pub struct MockBus {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<HashMap<String, MessageCallback>>,
    connected: AtomicBool,
    should_fail: AtomicBool,
}

impl MockBus {
    /// Connected mock bus
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            should_fail: AtomicBool::new(false),
        })
    }

    /// Connected mock bus whose publishes fail
    pub fn with_failure() -> Arc<Self> {
        let bus = Self::new();
        bus.should_fail.store(true, Ordering::SeqCst);
        bus
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|message| message.topic.clone())
            .collect()
    }

    /// Payload of the latest publish on `topic`
    pub fn payload_for(&self, topic: &str) -> Option<String> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|message| message.topic == topic)
            .map(PublishedMessage::payload_str)
    }

    /// Number of publishes on `topic`
    pub fn count_for(&self, topic: &str) -> usize {
        self.published
            .lock()
            .iter()
            .filter(|message| message.topic == topic)
            .count()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Deliver an inbound message as the broker would.
    ///
    /// Returns false when nothing is subscribed at `topic`.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let callback = self.subscriptions.lock().get(topic).cloned();
        match callback {
            Some(callback) => {
                callback(topic, payload);
                true
            }
            None => false,
        }
    }

    /// Forget recorded publishes
    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

impl MessageBus for MockBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), BusError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(BusError::PublishFailed(
                format!("mock publish failure on {topic}").into(),
            ));
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS, callback: MessageCallback) -> Result<(), BusError> {
        self.subscriptions.lock().insert(topic.to_string(), callback);
        Ok(())
    }
}
