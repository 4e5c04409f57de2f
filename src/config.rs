//! Device configuration
//!
//! Configuration is read from a TOML file with a `[device]` and an `[mqtt]` section.
//! Credentials may be given literally or through environment variables.

use crate::publisher::MAX_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomieConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub publish: PublishSection,
}

/// Device section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier, also used as the MQTT client id (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Root of the topic namespace, must end with '/'
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    /// Interval of the `$stats/uptime` report in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    /// Address published as `$localip`; discovered from the outbound interface when unset
    pub local_ip: Option<String>,
    /// Value published as `$implementation`
    #[serde(default = "default_implementation")]
    pub implementation: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username, overrides `username` when set
    pub username_env: Option<String>,
    /// Environment variable containing password, overrides `password` when set
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Bounded wait for the first ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Delays between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: Vec<u64>,
    /// Delay used once the backoff pattern is exhausted
    #[serde(default = "default_reconnect_sustained")]
    pub reconnect_sustained_ms: u64,
}

/// Publishing section used by the binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Property publish interval as a duration string, e.g. "5s" or "500ms"
    #[serde(default = "default_publish_interval")]
    pub interval: String,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            interval: default_publish_interval(),
        }
    }
}

fn default_base_topic() -> String {
    "homie/".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

fn default_implementation() -> String {
    crate::protocol::DEFAULT_IMPLEMENTATION.to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_backoff() -> Vec<u64> {
    vec![250, 500, 1000, 2000]
}

fn default_reconnect_sustained() -> u64 {
    5000
}

fn default_publish_interval() -> String {
    "5s".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MqttSection {
    /// Section pointing at a broker with every optional field defaulted
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            reconnect_sustained_ms: default_reconnect_sustained(),
        }
    }

    /// Username, preferring the environment variable when it is set
    pub fn resolved_username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref()).or_else(|| self.username.clone())
    }

    /// Password, preferring the environment variable when it is set
    pub fn resolved_password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref()).or_else(|| self.password.clone())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl HomieConfig {
    /// Build a configuration in code, with defaults for everything but the essentials
    pub fn new<I: Into<String>, B: Into<String>>(
        id: I,
        base_topic: B,
        stats_interval_secs: u64,
        mqtt: MqttSection,
    ) -> Self {
        Self {
            device: DeviceSection {
                id: id.into(),
                base_topic: base_topic.into(),
                stats_interval_secs,
                local_ip: None,
                implementation: default_implementation(),
            },
            mqtt,
            publish: PublishSection::default(),
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HomieConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        if !self.device.base_topic.ends_with('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "base_topic '{}' must end with '/'",
                self.device.base_topic
            )));
        }
        if self.device.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "stats_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.device.stats_interval_secs > MAX_INTERVAL.as_secs() {
            return Err(ConfigError::InvalidConfig(format!(
                "stats_interval_secs must be at most {}",
                MAX_INTERVAL.as_secs()
            )));
        }
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Stats report interval as a duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.device.stats_interval_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
base_topic = "devices/"
stats_interval_secs = 60
local_ip = "192.168.1.10"

[mqtt]
host = "localhost"
port = 1883
username = "user"
password = "password"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
