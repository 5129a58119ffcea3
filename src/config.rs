//! Collector configuration
//!
//! One `[collector]` section with process-wide settings and one `[[devices]]`
//! entry per monitored broker. Each device resolves to an immutable
//! [`DeviceTarget`] snapshot handed to its connection task.

use crate::transport::BrokerEndpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main collector configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorConfig {
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub devices: Vec<DeviceSection>,
}

/// Process-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorSection {
    /// Agent name stamped on every event
    #[serde(default = "default_collector_name")]
    pub name: String,
    /// Seconds between scheduling cycles (retry interval after a failure)
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Consumer tag registered on every queue
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,
    /// Timeout for TCP connect and the AMQP handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            name: default_collector_name(),
            cycle_interval_secs: default_cycle_interval(),
            consumer_tag: default_consumer_tag(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_collector_name() -> String {
    crate::event::COLLECTOR_NAME.to_string()
}

fn default_cycle_interval() -> u64 {
    300 // 5 minutes
}

fn default_consumer_tag() -> String {
    "zenoss".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_port() -> u16 {
    5672
}

/// One monitored broker queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Address the broker listens on
    pub manage_ip: String,
    pub queue: String,
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Inline password (prefer `password_env`)
    pub password: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// Per-device polling interval, defaults to the collector cycle interval
    pub interval_secs: Option<u64>,
}

/// Immutable per-device snapshot consumed by a connection task
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub device_id: String,
    pub manage_ip: String,
    pub queue: String,
    pub virtual_host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub interval: Duration,
}

impl DeviceTarget {
    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            host: self.manage_ip.clone(),
            port: self.port,
            virtual_host: self.virtual_host.clone(),
        }
    }
}

// Keeps the password out of logs
impl fmt::Debug for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTarget")
            .field("device_id", &self.device_id)
            .field("manage_ip", &self.manage_ip)
            .field("queue", &self.queue)
            .field("virtual_host", &self.virtual_host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("interval", &self.interval)
            .finish()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CollectorConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CollectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "collector.name must not be empty".to_string(),
            ));
        }
        if self.collector.consumer_tag.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "collector.consumer_tag must not be empty".to_string(),
            ));
        }
        if self.collector.cycle_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "collector.cycle_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.collector.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "collector.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Duplicate device ID '{}'",
                    device.id
                )));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.collector.connect_timeout_secs)
    }

    /// Resolve every device into a task snapshot, reading password variables now
    pub fn device_targets(&self) -> Result<Vec<DeviceTarget>, ConfigError> {
        self.devices
            .iter()
            .map(|device| device.to_target(self.collector.cycle_interval_secs))
            .collect()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[collector]
name = "zenamqp"

[[devices]]
id = "broker01"
manage_ip = "127.0.0.1"
queue = "events"
username = "guest"
password = "guest"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl DeviceSection {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.id)?;

        if self.manage_ip.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "Device '{}' has an empty manage_ip",
                self.id
            )));
        }
        if self.queue.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "Device '{}' has an empty queue name",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "Device '{}' port must be non-zero",
                self.id
            )));
        }
        if self.interval_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "Device '{}' interval_secs must be greater than 0",
                self.id
            )));
        }
        Ok(())
    }

    /// Password from `password_env` when set, else the inline value, else empty
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        match &self.password_env {
            Some(name) => {
                std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))
            }
            None => Ok(self.password.clone().unwrap_or_default()),
        }
    }

    pub fn to_target(&self, default_interval_secs: u64) -> Result<DeviceTarget, ConfigError> {
        Ok(DeviceTarget {
            device_id: self.id.clone(),
            manage_ip: self.manage_ip.clone(),
            queue: self.queue.clone(),
            virtual_host: self.virtual_host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.resolve_password()?,
            interval: Duration::from_secs(self.interval_secs.unwrap_or(default_interval_secs)),
        })
    }
}

/// Validate device ID format
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
