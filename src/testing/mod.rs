//! Testing utilities and mock implementations
//!
//! Lets devices, nodes and publishers be tested without an MQTT broker.

pub mod mocks;

pub use mocks::*;
