//! Homie convention constants and topic layout
//!
//! Device attributes, the device state machine values and the rules for
//! turning device/node/property names into MQTT topics.

pub mod topics;

pub use topics::*;

/// Homie convention version published as `$homie`
pub const HOMIE_SPEC_VERSION: &str = "3.0.1";

/// Default value published as `$implementation`
pub const DEFAULT_IMPLEMENTATION: &str = "homie-rs";

/// Device attribute names
pub mod attributes {
    pub const HOMIE: &str = "$homie";
    pub const NAME: &str = "$name";
    pub const LOCAL_IP: &str = "$localip";
    pub const IMPLEMENTATION: &str = "$implementation";
    pub const STATE: &str = "$state";
    pub const STATS_INTERVAL: &str = "$stats/interval";
    pub const STATS_UPTIME: &str = "$stats/uptime";
    pub const NODES: &str = "$nodes";
    pub const TYPE: &str = "$type";
    pub const PROPERTIES: &str = "$properties";
}

/// Values of the `$state` device attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Init,
    Ready,
    Disconnected,
    Sleeping,
    Lost,
    Alert,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Init => "init",
            DeviceState::Ready => "ready",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Sleeping => "sleeping",
            DeviceState::Lost => "lost",
            DeviceState::Alert => "alert",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
