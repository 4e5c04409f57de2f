//! Transport layer for device communication
//!
//! This module provides the message bus abstraction the device model publishes
//! through, and the MQTT implementation of it.

use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

pub use rumqttc::v5::mqttbytes::QoS;

/// Callback invoked with `(topic, payload)` for every inbound message on a subscription
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Message bus abstraction
///
/// Publishing and subscribing return as soon as the request is queued; delivery is
/// handled by the implementation. Both methods must be callable from synchronous code
/// running inside the async runtime, including from within inbound message callbacks.
pub trait MessageBus: Send + Sync {
    /// Check if the bus currently holds a live session
    fn is_connected(&self) -> bool;

    /// Queue a publish of `payload` to `topic`
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), BusError>;

    /// Queue a subscription to `topic`; `callback` replaces any previous callback for it
    fn subscribe(&self, topic: &str, qos: QoS, callback: MessageCallback) -> Result<(), BusError>;
}

/// Message bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Outbound queue is closed")]
    QueueClosed,
}

/// Type alias for the MQTT message bus
pub type MqttTransport = mqtt::MqttBus;
