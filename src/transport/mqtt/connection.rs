//! Pure connection state management for the MQTT bus
//!
//! This module contains pure functions for connection state management
//! and option construction.

use crate::config::MqttSection;
use crate::protocol::DeviceState;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};

/// Connection state for the MQTT bus
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Stopped by a local disconnect
    Closed,
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    pub fn from_section(config: &MqttSection) -> Self {
        Self {
            backoff_pattern: config.reconnect_backoff_ms.clone(),
            sustained_delay: config.reconnect_sustained_ms,
        }
    }

    /// Calculate backoff delay for given attempt (1-based) using the pattern,
    /// then sustain at `sustained_delay` forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Last-will topic and options for a device session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// MQTT client id, the device name
    pub client_id: String,
    /// Topic of the device `$state` attribute
    pub state_topic: String,
}

/// Pure function to configure MQTT options from config
///
/// The last will announces `lost` on the device state topic, retained, so that an
/// ungraceful disconnect is visible to every controller.
pub fn configure_mqtt_options(session: &SessionOptions, config: &MqttSection) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(session.client_id.clone(), config.host.clone(), config.port);

    if let Some(username) = config.resolved_username() {
        let password = config.resolved_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive());

    let lwt = LastWill::new(
        session.state_topic.clone(),
        DeviceState::Lost.as_str(),
        QoS::AtLeastOnce,
        true,
        None,
    );
    mqtt_options.set_last_will(lwt);

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![250, 500, 1000, 2000]);
        assert_eq!(config.sustained_delay, 5000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 250);
        assert_eq!(config.calculate_backoff_delay(2), 500);
        assert_eq!(config.calculate_backoff_delay(3), 1000);
        assert_eq!(config.calculate_backoff_delay(4), 2000);

        // Sustained delay after pattern exhausted
        assert_eq!(config.calculate_backoff_delay(5), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 42,
        };
        assert_eq!(config.calculate_backoff_delay(1), 42);
        assert_eq!(config.calculate_backoff_delay(0), 42);
    }

    #[test]
    fn test_reconnect_config_from_section() {
        let mut section = MqttSection::new("localhost", 1883);
        section.reconnect_backoff_ms = vec![10];
        section.reconnect_sustained_ms = 20;

        let config = ReconnectConfig::from_section(&section);
        assert_eq!(config.calculate_backoff_delay(1), 10);
        assert_eq!(config.calculate_backoff_delay(2), 20);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let mut section = MqttSection::new("broker.local", 1884);
        section.username = Some("user".to_string());
        section.password = Some("password".to_string());

        let session = SessionOptions {
            client_id: "test1".to_string(),
            state_topic: "devices/test1/$state".to_string(),
        };
        let options = configure_mqtt_options(&session, &section);

        assert_eq!(options.client_id(), "test1");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.keep_alive(), section.keep_alive());

        assert!(options.last_will().is_some(), "last will should be set");
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Disconnected("test".to_string())
        );
    }
}
