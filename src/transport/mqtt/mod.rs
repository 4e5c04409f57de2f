//! MQTT implementation of the message bus
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Pure connection state management and option construction
//! - [`message_handler`] - Pure event routing and the inbound subscription table
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use homie_device::config::MqttSection;
//! use homie_device::transport::mqtt::{
//!     configure_mqtt_options, MqttBus, OnConnect, ReconnectConfig, SessionOptions,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MqttSection::new("localhost", 1883);
//! let session = SessionOptions {
//!     client_id: "my-device".to_string(),
//!     state_topic: "homie/my-device/$state".to_string(),
//! };
//! let on_connect: OnConnect = Arc::new(|_bus| {});
//! let bus = MqttBus::connect(
//!     configure_mqtt_options(&session, &config),
//!     ReconnectConfig::from_section(&config),
//!     config.connect_timeout(),
//!     on_connect,
//! )
//! .await?;
//! bus.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttBus, OnConnect};
pub use connection::{configure_mqtt_options, ConnectionState, ReconnectConfig, SessionOptions};
pub use message_handler::{EventRoute, MessageHandler, SubscriptionTable};
