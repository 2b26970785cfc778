//! Error types for the discovery service

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur during service discovery.
///
/// Command methods on [`crate::Zeroconf`] do not return these; they are
/// delivered to subscribers as `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryError {
    /// A raw backend payload could not be turned into an event
    #[error("Malformed {event} event: {reason}")]
    MalformedEvent { event: String, reason: String },

    /// A listener set was attached while one was already in place
    #[error("Discovery listeners already in place")]
    ListenersAlreadyAttached,

    /// The native discovery stack reported a failure
    #[error("{message}")]
    Backend { message: String },

    /// No backend is registered for the implementation hint
    #[error("Implementation '{hint}' is not supported")]
    UnsupportedImplementation { hint: String },

    /// A backend failed to initialize
    #[error("Failed to initialize '{hint}' backend: {reason}")]
    BackendInit { hint: String, reason: String },

    /// Failed to start or stop browsing
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    ScanFailed { service_type: String, reason: String },

    /// Failed to register/announce a service
    #[error("Failed to register service '{service_name}': {reason}")]
    RegisterFailed {
        service_name: String,
        reason: String,
    },

    /// Failed to withdraw a service announcement
    #[error("Failed to unregister service '{service_name}': {reason}")]
    UnregisterFailed {
        service_name: String,
        reason: String,
    },

    /// A command carried invalid parameters
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Invalid configuration
    #[error("Invalid discovery configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The controller was created outside a tokio runtime
    #[error("A tokio runtime is required to run the discovery registry")]
    NoRuntime,

    /// Backend notifications were lost to a full event channel; the catalogs
    /// may no longer match the network until the next scan
    #[error("Event channel full, dropped {count} backend event(s)")]
    EventsDropped { count: u64 },

    /// A backend worker thread is gone
    #[error("Discovery worker stopped: {reason}")]
    WorkerStopped { reason: String },
}

impl DiscoveryError {
    /// Creates a backend error from a native failure message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a malformed event error.
    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors produced by the listener lifecycle rather than
    /// by a backend.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, DiscoveryError::ListenersAlreadyAttached)
    }
}
