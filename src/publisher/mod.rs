//! Periodic publishing
//!
//! - [`periodic`] - The tick loop and its producer registrations
//! - [`registry`] - The per-device table binding nodes and the device to publishers
//! - [`interval`] - Runtime interval changes driven by an inbound command

pub mod interval;
pub mod periodic;
mod registry;

pub use interval::{format_duration, parse_duration, IntervalControl};
pub use periodic::{DevicePublisherFn, NodePublisherFn, PeriodicPublisher, PublisherState, MAX_INTERVAL};
pub(crate) use registry::PublisherRegistry;
