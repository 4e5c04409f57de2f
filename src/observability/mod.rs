//! Observability for Homie devices
//!
//! Structured logging through `tracing`, configured from the environment.

pub mod logging;

pub use logging::{build_filter, init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{device_span, mqtt_span, publisher_span};
