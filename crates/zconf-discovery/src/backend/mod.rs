//! Discovery backends and the factory that selects them by implementation
//! hint.
//!
//! A backend accepts commands synchronously and reports everything that
//! happens afterwards, including failures, as [`BackendEvent`]s on the shared
//! [`RawEventBus`]. An `Err` from a command means the command could not be
//! issued at all.
//!
//! [`BackendEvent`]: crate::events::BackendEvent

mod loopback;
mod mdns;

pub use loopback::LoopbackBackend;
pub use mdns::MdnsBackend;

use crate::bus::RawEventBus;
use crate::error::{DiscoveryError, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use zconf_core::{DiscoveryConfig, ImplementationHint, PublishRequest, ScanRequest};

/// A service discovery engine.
pub trait DiscoveryBackend: Send + Sync {
    /// The hint this backend is registered under.
    fn hint(&self) -> ImplementationHint;

    /// Starts browsing, ending any browse this backend already runs.
    fn begin_scan(&self, request: &ScanRequest) -> Result<()>;

    /// Ends the current browse, if any.
    fn end_scan(&self) -> Result<()>;

    /// Advertises a service.
    fn register_service(&self, request: &PublishRequest) -> Result<()>;

    /// Withdraws a service advertised through this backend. Unknown names are
    /// ignored.
    fn unregister_service(&self, name: &str) -> Result<()>;

    /// Releases native resources.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds a backend that reports on the given bus.
pub type BackendConstructor = Box<
    dyn Fn(Arc<RawEventBus>, &DiscoveryConfig) -> Result<Arc<dyn DiscoveryBackend>>
        + Send
        + Sync,
>;

/// Creates backends on first use and caches one instance per hint.
pub struct BackendFactory {
    bus: Arc<RawEventBus>,
    config: DiscoveryConfig,
    constructors: HashMap<ImplementationHint, BackendConstructor>,
    instances: DashMap<ImplementationHint, Arc<dyn DiscoveryBackend>>,
}

impl BackendFactory {
    /// Creates a factory that knows the `mdns-sd` and `loopback` backends.
    pub fn new(bus: Arc<RawEventBus>, config: DiscoveryConfig) -> Self {
        let mut factory = Self::empty(bus, config);
        factory.register(ImplementationHint::mdns_sd(), |bus, _config| {
            Ok(Arc::new(MdnsBackend::new(bus)?) as Arc<dyn DiscoveryBackend>)
        });
        factory.register(ImplementationHint::loopback(), |bus, config| {
            Ok(Arc::new(LoopbackBackend::new(bus, config)) as Arc<dyn DiscoveryBackend>)
        });
        factory
    }

    /// Creates a factory with no backends registered.
    pub fn empty(bus: Arc<RawEventBus>, config: DiscoveryConfig) -> Self {
        Self {
            bus,
            config,
            constructors: HashMap::new(),
            instances: DashMap::new(),
        }
    }

    /// Registers (or replaces) the constructor for a hint.
    pub fn register<F>(&mut self, hint: ImplementationHint, constructor: F)
    where
        F: Fn(Arc<RawEventBus>, &DiscoveryConfig) -> Result<Arc<dyn DiscoveryBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.instances.remove(&hint);
        self.constructors.insert(hint, Box::new(constructor));
    }

    pub fn supports(&self, hint: &ImplementationHint) -> bool {
        self.constructors.contains_key(hint)
    }

    /// Returns the backend for a hint, creating it if needed.
    pub fn get(&self, hint: &ImplementationHint) -> Result<Arc<dyn DiscoveryBackend>> {
        let constructor =
            self.constructors
                .get(hint)
                .ok_or_else(|| DiscoveryError::UnsupportedImplementation {
                    hint: hint.to_string(),
                })?;

        let backend = self
            .instances
            .entry(hint.clone())
            .or_try_insert_with(|| {
                debug!(hint = %hint, "Creating discovery backend");
                constructor(Arc::clone(&self.bus), &self.config)
            })?;
        Ok(Arc::clone(backend.value()))
    }

    /// Backends created so far.
    pub fn instances(&self) -> Vec<Arc<dyn DiscoveryBackend>> {
        self.instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("supported", &self.constructors.keys().collect::<Vec<_>>())
            .field("instances", &self.instances.len())
            .finish()
    }
}
