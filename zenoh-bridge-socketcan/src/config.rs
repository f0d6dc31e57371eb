//! Configuration for the SocketCAN bridge.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use canbridge_common::config::{LoggingConfig, ZenohConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// CAN-specific settings
    #[serde(default)]
    pub can: CanConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// CAN interface and bridging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanConfig {
    /// SocketCAN device name (default: "can0")
    #[serde(default = "default_device")]
    pub device: String,

    /// Enable local loopback of transmitted frames (default: off)
    #[serde(default)]
    pub loopback: bool,

    /// Key expression prefix (default: "canbridge/can")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Diagnostics period in seconds (default: 1)
    #[serde(default = "default_diagnostics_period")]
    pub diagnostics_period_secs: u64,

    /// Arbitrary settings forwarded opaquely to the hardware interface
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

fn default_device() -> String {
    "can0".to_string()
}

fn default_key_prefix() -> String {
    "canbridge/can".to_string()
}

fn default_diagnostics_period() -> u64 {
    1
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            loopback: false,
            key_prefix: default_key_prefix(),
            diagnostics_period_secs: default_diagnostics_period(),
            settings: HashMap::new(),
        }
    }
}

impl CanBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CanBridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.can.device.is_empty() {
            return Err(ConfigError::Validation(
                "CAN device name cannot be empty".to_string(),
            ));
        }

        if self.can.key_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "Key prefix cannot be empty".to_string(),
            ));
        }

        if self.can.diagnostics_period_secs == 0 {
            return Err(ConfigError::Validation(
                "diagnostics_period_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config: CanBridgeConfig = json5::from_str("{}").unwrap();
        config.validate().unwrap();

        assert_eq!(config.can.device, "can0");
        assert!(!config.can.loopback);
        assert_eq!(config.can.key_prefix, "canbridge/can");
        assert_eq!(config.can.diagnostics_period_secs, 1);
        assert!(config.can.settings.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            zenoh: { mode: "client", connect: ["tcp/localhost:7447"] },
            can: {
                device: "can1",
                loopback: true,
                key_prefix: "plant/canbus",
                diagnostics_period_secs: 5,
                settings: {
                    read_timeout_ms: 50,
                    vendor_flag: "xyz",
                }
            },
            logging: { level: "debug" }
        }"#;

        let config: CanBridgeConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.can.device, "can1");
        assert!(config.can.loopback);
        assert_eq!(config.can.key_prefix, "plant/canbus");
        assert_eq!(config.can.diagnostics_period_secs, 5);
        assert_eq!(
            config.can.settings.get("read_timeout_ms"),
            Some(&serde_json::json!(50))
        );
        assert_eq!(config.zenoh.mode, "client");
    }

    #[test]
    fn test_validate_empty_device() {
        let json = r#"{ can: { device: "" } }"#;
        let config: CanBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_period() {
        let json = r#"{ can: { diagnostics_period_secs: 0 } }"#;
        let config: CanBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }
}
