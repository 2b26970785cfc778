//! # zconf Core
//!
//! Core types, error handling, and configuration shared by the zconf
//! service discovery crates.
//!
//! - **Types**: `ServiceRecord` (the exchange shape of one service),
//!   `ServiceCatalog`, scan and publish requests, implementation hints and
//!   session identifiers.
//! - **Errors**: serializable error types built on `thiserror`.
//! - **Configuration**: YAML files with environment variable overrides and
//!   validation, including logging and discovery defaults.
//!
//! ## Example
//!
//! ```
//! use zconf_core::types::{ImplementationHint, ScanRequest};
//!
//! let request = ScanRequest::default();
//! assert_eq!(request.service_type_string(), "_http._tcp.local.");
//! assert_eq!(request.implementation, ImplementationHint::default());
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use discovery_config::DiscoveryConfig;
pub use error::{Result, ZconfError};
pub use types::{
    ImplementationHint, PublishRequest, ScanRequest, ServiceCatalog, ServiceRecord, Session,
    SessionId,
};
