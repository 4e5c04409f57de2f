//! Error types for Homie devices
//!
//! Registration mistakes (duplicate names, double bindings, detached entities) are reported
//! as [`HomieError`] values instead of aborting the process. Callers are expected to treat
//! [`HomieError::is_configuration_error`] results as unrecoverable.

use crate::config::ConfigError;
use crate::transport::BusError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by property handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for device, node, property and publisher operations
#[derive(Debug, Error)]
pub enum HomieError {
    #[error("Node {node} already added to device {device}")]
    DuplicateNode { device: String, node: String },

    #[error("Property {property} already added to node {node}")]
    DuplicateProperty { node: String, property: String },

    #[error("Device publisher is already configured for device {device}")]
    DevicePublisherAlreadyBound { device: String },

    #[error("Periodic publisher already holds a device publisher for device {device}")]
    DevicePublisherAlreadySet { device: String },

    #[error("Node {node} is not attached to a device")]
    NodeDetached { node: String },

    #[error("Property {property} is not attached to a node")]
    PropertyDetached { property: String },

    #[error("No handler for property {property}, topic: {topic}")]
    MissingHandler { property: String, topic: String },

    #[error("Periodic publisher is closed and cannot be restarted")]
    PublisherClosed,

    #[error("Invalid publish interval: {0:?}")]
    InvalidInterval(Duration),

    #[error("Invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("No tokio runtime available to run the periodic publisher")]
    NoRuntime,

    #[error("Device {device} is not connected")]
    NotConnected { device: String },

    #[error("Handler for property {property} failed: {source}")]
    Handler {
        property: String,
        #[source]
        source: HandlerError,
    },

    #[error("Transport error: {0}")]
    Bus(#[from] BusError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HomieError {
    /// Programmer errors detected at registration or dispatch time.
    ///
    /// These are never retried; the binary exits when it sees one during setup.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            HomieError::DuplicateNode { .. }
                | HomieError::DuplicateProperty { .. }
                | HomieError::DevicePublisherAlreadyBound { .. }
                | HomieError::DevicePublisherAlreadySet { .. }
                | HomieError::NodeDetached { .. }
                | HomieError::PropertyDetached { .. }
                | HomieError::MissingHandler { .. }
                | HomieError::PublisherClosed
                | HomieError::InvalidInterval(_)
                | HomieError::NoRuntime
                | HomieError::Config(_)
        )
    }

    /// Create a duplicate node error
    pub fn duplicate_node<D: Into<String>, N: Into<String>>(device: D, node: N) -> Self {
        Self::DuplicateNode {
            device: device.into(),
            node: node.into(),
        }
    }

    /// Create a duplicate property error
    pub fn duplicate_property<N: Into<String>, P: Into<String>>(node: N, property: P) -> Self {
        Self::DuplicateProperty {
            node: node.into(),
            property: property.into(),
        }
    }

    /// Create an invalid duration error
    pub fn invalid_duration<I: Into<String>, R: Into<String>>(input: I, reason: R) -> Self {
        Self::InvalidDuration {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for Homie operations
pub type HomieResult<T> = Result<T, HomieError>;
