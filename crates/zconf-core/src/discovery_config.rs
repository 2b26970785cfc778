//! Configuration types for service discovery

use crate::types::{ImplementationHint, ScanRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a discovery session controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Service type scanned when none is given
    #[serde(default = "default_type")]
    pub default_type: String,

    /// Protocol scanned when none is given
    #[serde(default = "default_protocol")]
    pub default_protocol: String,

    /// Domain scanned when none is given
    #[serde(default = "default_domain")]
    pub default_domain: String,

    /// Backend used when a command carries no implementation hint
    #[serde(default)]
    pub default_implementation: ImplementationHint,

    /// Capacity of the raw event channel between backends and the registry
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Hold `removed` events this long so a quick re-announce cancels them
    /// (0 disables debouncing)
    #[serde(default)]
    pub remove_debounce_ms: u64,

    /// Hostname reported for services published through the loopback backend
    #[serde(default = "default_loopback_host")]
    pub loopback_host: String,

    /// Address reported for services published through the loopback backend
    #[serde(default = "default_loopback_address")]
    pub loopback_address: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_type: default_type(),
            default_protocol: default_protocol(),
            default_domain: default_domain(),
            default_implementation: ImplementationHint::default(),
            event_channel_capacity: default_event_channel_capacity(),
            remove_debounce_ms: 0,
            loopback_host: default_loopback_host(),
            loopback_address: default_loopback_address(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the removal debounce period as a Duration
    pub fn remove_debounce(&self) -> Duration {
        Duration::from_millis(self.remove_debounce_ms)
    }

    /// Scan request built from the configured defaults
    pub fn default_scan(&self) -> ScanRequest {
        ScanRequest::new(
            self.default_type.clone(),
            self.default_protocol.clone(),
            self.default_domain.clone(),
        )
        .with_implementation(self.default_implementation.clone())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity cannot be 0".to_string());
        }

        if self.default_type.is_empty() {
            return Err("default_type cannot be empty".to_string());
        }

        if self.default_protocol.is_empty() {
            return Err("default_protocol cannot be empty".to_string());
        }

        if self.default_domain.is_empty() {
            return Err("default_domain cannot be empty".to_string());
        }

        Ok(())
    }
}

fn default_type() -> String {
    "http".to_string()
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_domain() -> String {
    "local.".to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_loopback_host() -> String {
    "localhost".to_string()
}

fn default_loopback_address() -> String {
    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remove_debounce(), Duration::ZERO);
        assert_eq!(config.default_scan(), ScanRequest::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = DiscoveryConfig {
            event_channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: DiscoveryConfig =
            serde_yaml::from_str("default_type: ipp\nremove_debounce_ms: 250\n").unwrap();
        assert_eq!(config.default_type, "ipp");
        assert_eq!(config.default_protocol, "tcp");
        assert_eq!(config.remove_debounce(), Duration::from_millis(250));
        assert_eq!(config.default_implementation, ImplementationHint::mdns_sd());
    }
}
