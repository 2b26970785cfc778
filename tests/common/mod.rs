//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use zconf_core::config::AppConfig;
use zconf_discovery::{DiscoveryConfig, ImplementationHint, Zeroconf};

/// Get the path to test fixtures
pub fn fixtures_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).join("tests").join("fixtures")
}

/// Path to the sample configuration file
pub fn sample_config_path() -> PathBuf {
    fixtures_dir().join("zconf.yaml")
}

/// Load the sample configuration file
pub fn load_sample_config() -> AppConfig {
    AppConfig::from_file(sample_config_path()).expect("Failed to load sample config")
}

/// Discovery settings that route every command to the loopback backend
pub fn loopback_config() -> DiscoveryConfig {
    DiscoveryConfig {
        default_implementation: ImplementationHint::loopback(),
        ..Default::default()
    }
}

/// Create a controller backed by the loopback backend. Must be called inside
/// a tokio runtime.
pub fn loopback_zeroconf() -> Zeroconf {
    Zeroconf::new(loopback_config()).expect("Failed to create discovery controller")
}
