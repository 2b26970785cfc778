//! In-process backend: scans on it see only services published through it.

use super::DiscoveryBackend;
use crate::bus::RawEventBus;
use crate::error::Result;
use crate::events::BackendEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use zconf_core::{DiscoveryConfig, ImplementationHint, PublishRequest, ScanRequest, ServiceRecord};

#[derive(Debug, Default)]
struct LoopbackState {
    browsing: Option<ScanRequest>,
    published: HashMap<String, ServiceRecord>,
}

/// Backend that answers scans from its own registrations without touching
/// the network.
#[derive(Debug)]
pub struct LoopbackBackend {
    bus: Arc<RawEventBus>,
    host: String,
    address: String,
    state: Mutex<LoopbackState>,
}

impl LoopbackBackend {
    pub fn new(bus: Arc<RawEventBus>, config: &DiscoveryConfig) -> Self {
        Self {
            bus,
            host: config.loopback_host.clone(),
            address: config.loopback_address.clone(),
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn record_for(&self, request: &PublishRequest) -> ServiceRecord {
        let service_type = request.service_type_string();
        ServiceRecord {
            name: request.name.clone(),
            service_type: request.service_type.clone(),
            protocol: request.protocol.clone(),
            domain: request.domain.clone(),
            host: Some(self.host.clone()),
            full_name: Some(format!("{}.{}", request.name, service_type)),
            port: request.port,
            addresses: vec![self.address.clone()],
            txt: request.txt.clone(),
        }
    }

    fn emit_all(&self, events: Vec<BackendEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }
}

/// The discovery hit announced ahead of the full record.
fn unresolved(record: &ServiceRecord) -> ServiceRecord {
    ServiceRecord {
        service_type: record.service_type.clone(),
        protocol: record.protocol.clone(),
        domain: record.domain.clone(),
        ..ServiceRecord::named(record.name.clone())
    }
}

impl DiscoveryBackend for LoopbackBackend {
    fn hint(&self) -> ImplementationHint {
        ImplementationHint::loopback()
    }

    fn begin_scan(&self, request: &ScanRequest) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state.browsing.replace(request.clone()).is_some() {
                events.push(BackendEvent::Stop);
            }
            events.push(BackendEvent::Start);

            for record in state.published.values().filter(|r| request.matches(r)) {
                events.push(BackendEvent::Found(unresolved(record)));
                events.push(BackendEvent::Resolved(record.clone()));
            }
        }

        debug!(service_type = %request.service_type_string(), "Loopback browse started");
        self.emit_all(events);
        Ok(())
    }

    fn end_scan(&self) -> Result<()> {
        let was_browsing = self.state.lock().browsing.take().is_some();
        if was_browsing {
            debug!("Loopback browse stopped");
            self.bus.emit(BackendEvent::Stop);
        }
        Ok(())
    }

    fn register_service(&self, request: &PublishRequest) -> Result<()> {
        let record = self.record_for(request);
        let mut events = vec![BackendEvent::Published(record.clone())];
        {
            let mut state = self.state.lock();
            state.published.insert(record.name.clone(), record.clone());
            if state.browsing.as_ref().is_some_and(|scan| scan.matches(&record)) {
                events.push(BackendEvent::Found(unresolved(&record)));
                events.push(BackendEvent::Resolved(record));
            }
        }

        self.emit_all(events);
        Ok(())
    }

    fn unregister_service(&self, name: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(record) = state.published.remove(name) else {
                debug!(name, "Loopback service not registered, ignoring");
                return Ok(());
            };
            if state.browsing.as_ref().is_some_and(|scan| scan.matches(&record)) {
                events.push(BackendEvent::Removed(record.clone()));
            }
            events.push(BackendEvent::Unpublished(record));
        }

        self.emit_all(events);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.browsing = None;
        state.published.clear();
        Ok(())
    }
}
