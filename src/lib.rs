//! Homie devices over MQTT
//!
//! A Rust implementation of the Homie 3.0.1 convention: a device/node/property model mapped
//! onto MQTT topics, with timer-driven re-publication of property values.
//!
//! # Overview
//!
//! - [`device`] - Devices, nodes and properties, and the connection initialisation sequence
//! - [`publisher`] - Periodic publishers shared by many producers, and runtime interval changes
//! - [`transport`] - The message bus abstraction and its MQTT implementation
//! - [`config`] - TOML configuration
//!
//! # Quick Start
//!
//! ```rust
//! use homie_device::config::{HomieConfig, MqttSection};
//! use homie_device::device::Device;
//! use homie_device::testing::MockBus;
//!
//! let config = HomieConfig::new("sensor-1", "homie/", 60, MqttSection::new("localhost", 1883));
//! let device = Device::from_config(config);
//! let node = device.new_node("temperature", "sensor").unwrap();
//! node.new_property("celsius", "float").unwrap().set_value("21.5");
//!
//! let bus = MockBus::new();
//! device.on_connect(bus.clone()).unwrap();
//! assert_eq!(
//!     bus.payload_for("homie/sensor-1/temperature/celsius").as_deref(),
//!     Some("21.5")
//! );
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::{HomieConfig, MqttSection};
pub use device::{Device, Node, Property};
pub use error::{HomieError, HomieResult};
pub use protocol::*;
pub use publisher::{IntervalControl, PeriodicPublisher};
pub use transport::{MessageBus, MqttTransport};
