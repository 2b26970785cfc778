//! Configuration types for service discovery
//!
//! Re-exports configuration from zconf-core so applications only need this crate

pub use zconf_core::discovery_config::DiscoveryConfig;
