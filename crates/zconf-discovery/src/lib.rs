//! Zeroconf service discovery and advertisement
//!
//! This crate keeps a live catalog of services found on the local network:
//! - Browse for a DNS-SD service type and track found, resolved and removed services
//! - Advertise services and track what this process has published
//! - Select between discovery backends by implementation hint
//! - Deliver every change as a [`ZeroconfEvent`] to subscribers
//!
//! # Architecture
//!
//! Backends report raw notifications on a shared [`RawEventBus`]. The bus
//! routes each kind through exactly one [`ListenerSet`] into a bounded
//! channel, and a single background task applies the queued events to the
//! [`ServiceRegistry`], which owns the catalogs and the subscriber lists.
//! The [`ListenerLifecycleController`] attaches the catalog-mutating routes
//! when a scan starts and releases them when it stops, so events arriving
//! after `stop` never reach the catalog.
//!
//! # Backends
//!
//! - `mdns-sd` (default): multicast DNS on the local network
//! - `loopback`: in-process, scans see only services published through it
//!
//! # Example
//!
//! ```no_run
//! use zconf_discovery::{DiscoveryConfig, PublishRequest, ScanRequest, Zeroconf};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let zeroconf = Zeroconf::new(DiscoveryConfig::default())?;
//!
//!     zeroconf.publish_service(PublishRequest::new("my-web", 8080).txt("path", "/"));
//!     zeroconf.scan(ScanRequest::default());
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(3)).await;
//!     for (name, service) in zeroconf.get_resolved_services() {
//!         println!("{name}: {:?}:{}", service.primary_address(), service.port);
//!     }
//!
//!     zeroconf.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod bus;
pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod session;

pub use backend::{BackendFactory, DiscoveryBackend, LoopbackBackend, MdnsBackend};
pub use bus::{EventSink, ListenerSet, RawEventBus};
pub use config::DiscoveryConfig;
pub use emitter::{EventEmitter, EventStream};
pub use error::{DiscoveryError, Result};
pub use events::{BackendEvent, EventKind, RawEventKind, ZeroconfEvent};
pub use lifecycle::ListenerLifecycleController;
pub use registry::ServiceRegistry;
pub use session::{Zeroconf, ZeroconfBuilder};
pub use zconf_core::{
    ImplementationHint, PublishRequest, ScanRequest, ServiceCatalog, ServiceRecord, Session,
    SessionId,
};
