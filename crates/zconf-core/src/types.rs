//! Core types for zconf service discovery.
//!
//! This module defines the exchange shape of a discovered or published
//! service, the catalog that indexes services by name, and the requests used
//! to start scans and advertise services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Mapping from service name to its current record.
pub type ServiceCatalog = HashMap<String, ServiceRecord>;

/// One discovered or published service.
///
/// Serializes to the exchange shape consumed by applications:
///
/// ```text
/// { name, type, protocol, domain, host, fullName, port, addresses, txt }
/// ```
///
/// Everything except `name` may be missing until the service is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Instance name, the catalog key
    pub name: String,

    /// Service type without the leading underscore (e.g. "http")
    #[serde(rename = "type", default)]
    pub service_type: String,

    /// Transport protocol without the leading underscore (e.g. "tcp")
    #[serde(default)]
    pub protocol: String,

    /// Domain (e.g. "local.")
    #[serde(default)]
    pub domain: String,

    /// Hostname of the advertising machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Fully qualified service instance name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Service port, zero until resolved
    #[serde(default)]
    pub port: u16,

    /// Resolved addresses in the order the backend reported them
    #[serde(default)]
    pub addresses: Vec<String>,

    /// TXT record properties
    #[serde(default)]
    pub txt: HashMap<String, String>,
}

impl ServiceRecord {
    /// Creates a bare record carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Returns true once address or port data is present.
    pub fn is_resolved(&self) -> bool {
        self.port != 0 || !self.addresses.is_empty()
    }

    /// Returns the primary address (prefers IPv4).
    pub fn primary_address(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|addr| !addr.contains(':'))
            .or_else(|| self.addresses.first())
            .map(String::as_str)
    }

    /// Returns the DNS-SD service type string, e.g. `_http._tcp.local.`.
    pub fn service_type_string(&self) -> String {
        format_service_type(&self.service_type, &self.protocol, &self.domain)
    }

    /// Reads a record from a loosely shaped JSON object.
    ///
    /// Only `name` is required and must be a non-empty string. Any other field
    /// that is missing, null or of the wrong type takes its default. TXT values
    /// are coerced to text and a port outside `u16` reads as zero.
    pub fn from_json_lenient(payload: &serde_json::Value) -> Option<Self> {
        let fields = payload.as_object()?;
        let name = fields.get("name")?.as_str()?;
        if name.trim().is_empty() {
            return None;
        }

        let text = |key: &str| {
            fields
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };

        let port = match fields.get("port") {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(0);

        let addresses = match fields.get("addresses") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        let txt = match fields.get("txt") {
            Some(serde_json::Value::Object(entries)) => entries
                .iter()
                .map(|(key, value)| (key.clone(), coerce_txt_value(value)))
                .collect(),
            _ => HashMap::new(),
        };

        Some(Self {
            name: name.to_string(),
            service_type: text("type").unwrap_or_default(),
            protocol: text("protocol").unwrap_or_default(),
            domain: text("domain").unwrap_or_default(),
            host: text("host"),
            full_name: text("fullName"),
            port,
            addresses,
            txt,
        })
    }
}

/// Builds `_type._protocol.domain.` from its parts.
pub fn format_service_type(service_type: &str, protocol: &str, domain: &str) -> String {
    let domain = if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{}.", domain)
    };
    format!("_{}._{}.{}", service_type, protocol, domain)
}

/// Splits a DNS-SD type string into `(type, protocol, domain)`.
///
/// `_ipp._tcp.local.` becomes `("ipp", "tcp", "local.")`. Returns `None` when
/// the string does not have the two underscore-prefixed labels.
pub fn split_service_type(ty_domain: &str) -> Option<(String, String, String)> {
    let mut labels = ty_domain.splitn(3, '.');
    let service_type = labels.next()?.strip_prefix('_')?;
    let protocol = labels.next()?.strip_prefix('_')?;
    let domain = labels.next().unwrap_or_default();
    if service_type.is_empty() || protocol.is_empty() {
        return None;
    }
    let domain = if domain.is_empty() { "local." } else { domain };
    Some((
        service_type.to_string(),
        protocol.to_string(),
        domain.to_string(),
    ))
}

/// Selects which discovery backend serves a command.
///
/// Hints are compared case-insensitively; a blank hint selects the default
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ImplementationHint(String);

impl ImplementationHint {
    /// Multicast DNS backend built on the `mdns-sd` crate.
    pub const MDNS_SD: &'static str = "mdns-sd";

    /// In-process backend that only sees services published through itself.
    pub const LOOPBACK: &'static str = "loopback";

    /// Creates a hint, normalizing case and whitespace.
    pub fn new(hint: impl AsRef<str>) -> Self {
        let normalized = hint.as_ref().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            Self::default()
        } else {
            Self(normalized)
        }
    }

    /// Hint selecting the `mdns-sd` backend.
    pub fn mdns_sd() -> Self {
        Self(Self::MDNS_SD.to_string())
    }

    /// Hint selecting the loopback backend.
    pub fn loopback() -> Self {
        Self(Self::LOOPBACK.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ImplementationHint {
    fn default() -> Self {
        Self::mdns_sd()
    }
}

impl fmt::Display for ImplementationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ImplementationHint {
    fn from(hint: String) -> Self {
        Self::new(hint)
    }
}

impl From<&str> for ImplementationHint {
    fn from(hint: &str) -> Self {
        Self::new(hint)
    }
}

impl From<ImplementationHint> for String {
    fn from(hint: ImplementationHint) -> Self {
        hint.0
    }
}

impl std::str::FromStr for ImplementationHint {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Parameters of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(rename = "type")]
    pub service_type: String,
    pub protocol: String,
    pub domain: String,
    #[serde(default)]
    pub implementation: ImplementationHint,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            service_type: "http".to_string(),
            protocol: "tcp".to_string(),
            domain: "local.".to_string(),
            implementation: ImplementationHint::default(),
        }
    }
}

impl ScanRequest {
    pub fn new(
        service_type: impl Into<String>,
        protocol: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            protocol: protocol.into(),
            domain: domain.into(),
            implementation: ImplementationHint::default(),
        }
    }

    pub fn with_implementation(mut self, hint: impl Into<ImplementationHint>) -> Self {
        self.implementation = hint.into();
        self
    }

    /// Returns the DNS-SD service type string, e.g. `_http._tcp.local.`.
    pub fn service_type_string(&self) -> String {
        format_service_type(&self.service_type, &self.protocol, &self.domain)
    }

    /// Returns true if a record belongs to the class this request scans for.
    pub fn matches(&self, record: &ServiceRecord) -> bool {
        record.service_type == self.service_type
            && record.protocol == self.protocol
            && record.service_type_string() == self.service_type_string()
    }

    /// Returns false only for a record that names a different class.
    ///
    /// Unlike [`ScanRequest::matches`], blank type, protocol or domain fields
    /// on the record are treated as unknown rather than as a mismatch.
    pub fn admits(&self, record: &ServiceRecord) -> bool {
        fn same(ours: &str, theirs: &str) -> bool {
            let theirs = theirs.trim_end_matches('.');
            theirs.is_empty() || ours.trim_end_matches('.').eq_ignore_ascii_case(theirs)
        }

        same(&self.service_type, &record.service_type)
            && same(&self.protocol, &record.protocol)
            && same(&self.domain, &record.domain)
    }
}

/// Parameters of a service advertisement.
///
/// TXT values are always carried as text; [`PublishRequest::txt`] and
/// [`PublishRequest::with_json_txt`] coerce other values to strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub service_type: String,
    pub protocol: String,
    pub domain: String,
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub txt: HashMap<String, String>,
    #[serde(default)]
    pub implementation: ImplementationHint,
}

impl PublishRequest {
    /// Creates a request for `_http._tcp.local.` on the default backend.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            service_type: "http".to_string(),
            protocol: "tcp".to_string(),
            domain: "local.".to_string(),
            name: name.into(),
            port,
            txt: HashMap::new(),
            implementation: ImplementationHint::default(),
        }
    }

    pub fn service(
        mut self,
        service_type: impl Into<String>,
        protocol: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        self.service_type = service_type.into();
        self.protocol = protocol.into();
        self.domain = domain.into();
        self
    }

    /// Adds one TXT entry, converting the value to its string form.
    pub fn txt(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.txt.insert(key.into(), value.to_string());
        self
    }

    /// Adds every entry of a JSON object as TXT entries.
    pub fn with_json_txt(mut self, values: &serde_json::Map<String, serde_json::Value>) -> Self {
        for (key, value) in values {
            self.txt.insert(key.clone(), coerce_txt_value(value));
        }
        self
    }

    pub fn with_implementation(mut self, hint: impl Into<ImplementationHint>) -> Self {
        self.implementation = hint.into();
        self
    }

    /// Returns the DNS-SD service type string, e.g. `_http._tcp.local.`.
    pub fn service_type_string(&self) -> String {
        format_service_type(&self.service_type, &self.protocol, &self.domain)
    }

    /// Validates the request.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("service name cannot be empty".to_string());
        }
        if self.service_type.is_empty() || self.protocol.is_empty() {
            return Err("service type and protocol are required".to_string());
        }
        if self.port == 0 {
            return Err("port cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Converts a JSON value to the text carried in a TXT record.
///
/// Strings pass through unchanged, `null` becomes an empty string and every
/// other value uses its JSON rendering.
pub fn coerce_txt_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One active scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub request: ScanRequest,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(request: ScanRequest) -> Self {
        Self {
            id: SessionId::new(),
            request,
            started_at: Utc::now(),
        }
    }

    pub fn implementation(&self) -> &ImplementationHint {
        &self.request.implementation
    }
}
