//! Raw backend notifications and the semantic events emitted to subscribers.

use crate::error::{DiscoveryError, Result};
use serde::Serialize;
use std::fmt;
use zconf_core::ServiceRecord;

/// Kinds of raw notifications a backend can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Start,
    Stop,
    Error,
    Found,
    Resolved,
    Removed,
    Published,
    Unpublished,
}

impl RawEventKind {
    /// Kinds routed through the per-session listener set. These are the only
    /// kinds that mutate the discovered and resolved catalogs.
    pub const SESSION: [RawEventKind; 3] = [
        RawEventKind::Found,
        RawEventKind::Resolved,
        RawEventKind::Removed,
    ];

    /// Kinds routed through the control listener set, which lives as long as
    /// the controller.
    pub const CONTROL: [RawEventKind; 5] = [
        RawEventKind::Start,
        RawEventKind::Stop,
        RawEventKind::Error,
        RawEventKind::Published,
        RawEventKind::Unpublished,
    ];

    pub fn is_session_scoped(&self) -> bool {
        Self::SESSION.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawEventKind::Start => "start",
            RawEventKind::Stop => "stop",
            RawEventKind::Error => "error",
            RawEventKind::Found => "found",
            RawEventKind::Resolved => "resolved",
            RawEventKind::Removed => "removed",
            RawEventKind::Published => "published",
            RawEventKind::Unpublished => "unpublished",
        }
    }
}

impl fmt::Display for RawEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated backend notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Start,
    Stop,
    Error { message: String },
    Found(ServiceRecord),
    Resolved(ServiceRecord),
    Removed(ServiceRecord),
    Published(ServiceRecord),
    Unpublished(ServiceRecord),
}

impl BackendEvent {
    pub fn kind(&self) -> RawEventKind {
        match self {
            BackendEvent::Start => RawEventKind::Start,
            BackendEvent::Stop => RawEventKind::Stop,
            BackendEvent::Error { .. } => RawEventKind::Error,
            BackendEvent::Found(_) => RawEventKind::Found,
            BackendEvent::Resolved(_) => RawEventKind::Resolved,
            BackendEvent::Removed(_) => RawEventKind::Removed,
            BackendEvent::Published(_) => RawEventKind::Published,
            BackendEvent::Unpublished(_) => RawEventKind::Unpublished,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        BackendEvent::Error {
            message: message.into(),
        }
    }

    pub fn record(&self) -> Option<&ServiceRecord> {
        match self {
            BackendEvent::Found(record)
            | BackendEvent::Resolved(record)
            | BackendEvent::Removed(record)
            | BackendEvent::Published(record)
            | BackendEvent::Unpublished(record) => Some(record),
            _ => None,
        }
    }

    /// Builds an event from a loosely shaped payload.
    ///
    /// Record kinds need a JSON object with a non-empty string `name`; every
    /// other field is read leniently (see [`ServiceRecord::from_json_lenient`]).
    /// Error payloads may be a bare string or an object with a `message` field;
    /// start and stop ignore their payload.
    pub fn from_payload(kind: RawEventKind, payload: serde_json::Value) -> Result<Self> {
        let record = |payload: serde_json::Value| -> Result<ServiceRecord> {
            ServiceRecord::from_json_lenient(&payload)
                .ok_or_else(|| DiscoveryError::malformed(kind.as_str(), "missing service name"))
        };

        let event = match kind {
            RawEventKind::Start => BackendEvent::Start,
            RawEventKind::Stop => BackendEvent::Stop,
            RawEventKind::Error => BackendEvent::error(error_message(payload)),
            RawEventKind::Found => BackendEvent::Found(record(payload)?),
            RawEventKind::Resolved => BackendEvent::Resolved(record(payload)?),
            RawEventKind::Removed => BackendEvent::Removed(record(payload)?),
            RawEventKind::Published => BackendEvent::Published(record(payload)?),
            RawEventKind::Unpublished => BackendEvent::Unpublished(record(payload)?),
        };
        event.validate()
    }

    /// Rejects record events whose name is empty.
    pub fn validate(self) -> Result<Self> {
        match self.record() {
            Some(record) if record.name.trim().is_empty() => Err(DiscoveryError::malformed(
                self.kind().as_str(),
                "missing service name",
            )),
            _ => Ok(self),
        }
    }
}

fn error_message(payload: serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(message) => message,
        serde_json::Value::Object(ref fields) => match fields.get("message") {
            Some(serde_json::Value::String(message)) => message.clone(),
            _ => payload.to_string(),
        },
        serde_json::Value::Null => "unknown backend error".to_string(),
        other => other.to_string(),
    }
}

/// Kinds of semantic events delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Stop,
    Error,
    Found,
    Resolved,
    Remove,
    Update,
    Published,
    Unpublished,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Start,
        EventKind::Stop,
        EventKind::Error,
        EventKind::Found,
        EventKind::Resolved,
        EventKind::Remove,
        EventKind::Update,
        EventKind::Published,
        EventKind::Unpublished,
    ];
}

/// Semantic event emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ZeroconfEvent {
    Start,
    Stop,
    Error(DiscoveryError),
    Found(ServiceRecord),
    Resolved(ServiceRecord),
    Remove(ServiceRecord),
    Update,
    Published(ServiceRecord),
    Unpublished(ServiceRecord),
}

impl ZeroconfEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ZeroconfEvent::Start => EventKind::Start,
            ZeroconfEvent::Stop => EventKind::Stop,
            ZeroconfEvent::Error(_) => EventKind::Error,
            ZeroconfEvent::Found(_) => EventKind::Found,
            ZeroconfEvent::Resolved(_) => EventKind::Resolved,
            ZeroconfEvent::Remove(_) => EventKind::Remove,
            ZeroconfEvent::Update => EventKind::Update,
            ZeroconfEvent::Published(_) => EventKind::Published,
            ZeroconfEvent::Unpublished(_) => EventKind::Unpublished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_found_payload() {
        let event = BackendEvent::from_payload(
            RawEventKind::Found,
            json!({ "name": "printer-1", "type": "ipp", "protocol": "tcp" }),
        )
        .unwrap();

        match event {
            BackendEvent::Found(record) => {
                assert_eq!(record.name, "printer-1");
                assert_eq!(record.service_type, "ipp");
                assert!(!record.is_resolved());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_payload_without_name_is_malformed() {
        for payload in [json!({}), json!({ "name": "" }), json!(null), json!("printer")] {
            let result = BackendEvent::from_payload(RawEventKind::Resolved, payload);
            assert!(matches!(
                result,
                Err(DiscoveryError::MalformedEvent { .. })
            ));
        }
    }

    #[test]
    fn test_named_payload_with_odd_fields_is_kept() {
        let event = BackendEvent::from_payload(
            RawEventKind::Removed,
            json!({ "name": "printer-1", "addresses": null, "host": null, "port": "x" }),
        )
        .unwrap();
        assert_eq!(event, BackendEvent::Removed(ServiceRecord::named("printer-1")));

        let event = BackendEvent::from_payload(
            RawEventKind::Resolved,
            json!({ "name": "printer-1", "port": 9100, "txt": { "ver": 2 } }),
        )
        .unwrap();
        match event {
            BackendEvent::Resolved(record) => {
                assert_eq!(record.port, 9100);
                assert_eq!(record.txt["ver"], "2");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_error_payload_shapes() {
        let from_string =
            BackendEvent::from_payload(RawEventKind::Error, json!("permission denied")).unwrap();
        assert_eq!(from_string, BackendEvent::error("permission denied"));

        let from_object = BackendEvent::from_payload(
            RawEventKind::Error,
            json!({ "message": "network unavailable" }),
        )
        .unwrap();
        assert_eq!(from_object, BackendEvent::error("network unavailable"));
    }

    #[test]
    fn test_session_scoped_kinds() {
        assert!(RawEventKind::Found.is_session_scoped());
        assert!(RawEventKind::Removed.is_session_scoped());
        assert!(!RawEventKind::Stop.is_session_scoped());
        assert!(!RawEventKind::Published.is_session_scoped());
    }

    #[test]
    fn test_event_serialization() {
        let event = ZeroconfEvent::Found(ServiceRecord::named("printer-1"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "found");
        assert_eq!(json["data"]["name"], "printer-1");

        let json = serde_json::to_value(ZeroconfEvent::Update).unwrap();
        assert_eq!(json["event"], "update");
    }
}
