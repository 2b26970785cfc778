//! Multicast DNS backend built on `mdns-sd`.
//!
//! Every `ServiceDaemon` call runs on one dedicated worker thread, fed by an
//! unbounded queue, so commands never block the caller. Browse results are
//! pumped onto the bus by a per-browse thread.

use super::DiscoveryBackend;
use crate::bus::RawEventBus;
use crate::error::{DiscoveryError, Result};
use crate::events::BackendEvent;
use mdns_sd::{Receiver, ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use zconf_core::types::split_service_type;
use zconf_core::{ImplementationHint, PublishRequest, ScanRequest, ServiceRecord};

enum MdnsOp {
    Browse(String),
    StopBrowse,
    Register(Box<ServiceInfo>, ServiceRecord),
    Unregister(String),
    Shutdown,
}

/// Backend that browses and advertises on the local network.
pub struct MdnsBackend {
    op_tx: Mutex<mpsc::Sender<MdnsOp>>,
    host: String,
}

impl MdnsBackend {
    pub fn new(bus: Arc<RawEventBus>) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::BackendInit {
            hint: ImplementationHint::MDNS_SD.to_string(),
            reason: e.to_string(),
        })?;
        let (op_tx, op_rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("zconf-mdns-ops".into())
            .spawn(move || Worker::new(daemon, bus).run(op_rx))
            .map_err(|e| DiscoveryError::BackendInit {
                hint: ImplementationHint::MDNS_SD.to_string(),
                reason: format!("failed to spawn mDNS worker: {e}"),
            })?;

        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        info!(host = %hostname, "mDNS backend ready");
        Ok(Self {
            op_tx: Mutex::new(op_tx),
            host: format!("{hostname}.local."),
        })
    }

    fn send(&self, op: MdnsOp) -> Result<()> {
        self.op_tx
            .lock()
            .send(op)
            .map_err(|_| DiscoveryError::WorkerStopped {
                reason: "mDNS worker is not running".to_string(),
            })
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn hint(&self) -> ImplementationHint {
        ImplementationHint::mdns_sd()
    }

    fn begin_scan(&self, request: &ScanRequest) -> Result<()> {
        self.send(MdnsOp::Browse(request.service_type_string()))
    }

    fn end_scan(&self) -> Result<()> {
        self.send(MdnsOp::StopBrowse)
    }

    fn register_service(&self, request: &PublishRequest) -> Result<()> {
        let service_type = request.service_type_string();
        let info = ServiceInfo::new(
            &service_type,
            &request.name,
            &self.host,
            "",
            request.port,
            request.txt.clone(),
        )
        .map_err(|e| DiscoveryError::RegisterFailed {
            service_name: request.name.clone(),
            reason: e.to_string(),
        })?
        .enable_addr_auto();

        let record = ServiceRecord {
            name: request.name.clone(),
            service_type: request.service_type.clone(),
            protocol: request.protocol.clone(),
            domain: request.domain.clone(),
            host: Some(self.host.clone()),
            full_name: Some(info.get_fullname().to_string()),
            port: request.port,
            addresses: Vec::new(),
            txt: request.txt.clone(),
        };

        debug!(fullname = %info.get_fullname(), "Queued mDNS register");
        self.send(MdnsOp::Register(Box::new(info), record))
    }

    fn unregister_service(&self, name: &str) -> Result<()> {
        self.send(MdnsOp::Unregister(name.to_string()))
    }

    fn shutdown(&self) -> Result<()> {
        self.send(MdnsOp::Shutdown)
    }
}

impl Drop for MdnsBackend {
    fn drop(&mut self) {
        let _ = self.send(MdnsOp::Shutdown);
    }
}

struct Worker {
    daemon: ServiceDaemon,
    bus: Arc<RawEventBus>,
    browsing: Option<String>,
    generation: Arc<AtomicU64>,
    registrations: HashMap<String, ServiceRecord>,
}

impl Worker {
    fn new(daemon: ServiceDaemon, bus: Arc<RawEventBus>) -> Self {
        Self {
            daemon,
            bus,
            browsing: None,
            generation: Arc::new(AtomicU64::new(0)),
            registrations: HashMap::new(),
        }
    }

    fn run(mut self, rx: mpsc::Receiver<MdnsOp>) {
        debug!("mDNS worker thread started");

        while let Ok(op) = rx.recv() {
            match op {
                MdnsOp::Browse(service_type) => self.browse(service_type),
                MdnsOp::StopBrowse => self.stop_browse(),
                MdnsOp::Register(info, record) => self.register(*info, record),
                MdnsOp::Unregister(name) => self.unregister(&name),
                MdnsOp::Shutdown => {
                    self.stop_browse();
                    for name in self.registrations.keys().cloned().collect::<Vec<_>>() {
                        self.unregister(&name);
                    }
                    if let Err(e) = self.daemon.shutdown() {
                        debug!(error = %e, "mDNS daemon shutdown failed");
                    }
                    break;
                }
            }
        }

        debug!("mDNS worker thread stopped");
    }

    fn browse(&mut self, service_type: String) {
        self.stop_browse();

        let receiver = match self.daemon.browse(&service_type) {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!(service_type, error = %e, "mDNS browse failed");
                self.bus.emit(BackendEvent::error(
                    DiscoveryError::ScanFailed {
                        service_type,
                        reason: e.to_string(),
                    }
                    .to_string(),
                ));
                return;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pump = Pump {
            bus: Arc::clone(&self.bus),
            current: Arc::clone(&self.generation),
            generation,
        };
        let spawned = std::thread::Builder::new()
            .name("zconf-mdns-browse".into())
            .spawn(move || pump.run(receiver));

        match spawned {
            Ok(_) => {
                debug!(service_type, "mDNS browse started");
                self.browsing = Some(service_type);
            }
            Err(e) => {
                let _ = self.daemon.stop_browse(&service_type);
                self.bus.emit(BackendEvent::error(format!(
                    "failed to spawn mDNS browse thread: {e}"
                )));
            }
        }
    }

    fn stop_browse(&mut self) {
        if let Some(service_type) = self.browsing.take() {
            // Retire the pump so nothing it still holds reaches the bus.
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.daemon.stop_browse(&service_type) {
                debug!(service_type, error = %e, "mDNS stop_browse failed");
            }
            self.bus.emit(BackendEvent::Stop);
        }
    }

    fn register(&mut self, info: ServiceInfo, record: ServiceRecord) {
        match self.daemon.register(info) {
            Ok(()) => {
                self.registrations
                    .insert(record.name.clone(), record.clone());
                self.bus.emit(BackendEvent::Published(record));
            }
            Err(e) => {
                warn!(name = %record.name, error = %e, "mDNS register failed");
                self.bus.emit(BackendEvent::error(
                    DiscoveryError::RegisterFailed {
                        service_name: record.name,
                        reason: e.to_string(),
                    }
                    .to_string(),
                ));
            }
        }
    }

    fn unregister(&mut self, name: &str) {
        let Some(record) = self.registrations.remove(name) else {
            debug!(name, "mDNS service not registered, ignoring");
            return;
        };
        let fullname = record.full_name.clone().unwrap_or_default();

        match self.daemon.unregister(&fullname) {
            Ok(_) => {
                self.bus.emit(BackendEvent::Unpublished(record));
            }
            Err(e) => {
                warn!(fullname, error = %e, "mDNS unregister failed");
                self.bus.emit(BackendEvent::error(
                    DiscoveryError::UnregisterFailed {
                        service_name: record.name,
                        reason: e.to_string(),
                    }
                    .to_string(),
                ));
            }
        }
    }
}

struct Pump {
    bus: Arc<RawEventBus>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl Pump {
    fn run(self, receiver: Receiver<MdnsEvent>) {
        let mut started = false;

        while let Ok(event) = receiver.recv() {
            if self.current.load(Ordering::SeqCst) != self.generation {
                break;
            }

            let event = match event {
                // Sent for every query retransmission; report it once.
                MdnsEvent::SearchStarted(_) if started => continue,
                MdnsEvent::SearchStarted(ty) => {
                    started = true;
                    trace!(service_type = %ty, "Search started");
                    BackendEvent::Start
                }
                MdnsEvent::ServiceFound(ty, fullname) => {
                    BackendEvent::Found(record_from_name(&ty, &fullname))
                }
                MdnsEvent::ServiceResolved(info) => BackendEvent::Resolved(record_from_info(&info)),
                MdnsEvent::ServiceRemoved(ty, fullname) => {
                    BackendEvent::Removed(record_from_name(&ty, &fullname))
                }
                MdnsEvent::SearchStopped(_) => break,
                #[allow(unreachable_patterns)]
                _ => continue,
            };
            self.bus.emit(event);
        }

        trace!(generation = self.generation, "mDNS browse pump finished");
    }
}

/// Instance name from a full name: `My Printer._ipp._tcp.local.` gives
/// `My Printer`.
fn instance_name(ty_domain: &str, fullname: &str) -> String {
    fullname
        .strip_suffix(ty_domain)
        .map(|name| name.trim_end_matches('.'))
        .unwrap_or_else(|| fullname.split("._").next().unwrap_or(fullname))
        .to_string()
}

fn record_from_name(ty_domain: &str, fullname: &str) -> ServiceRecord {
    let (service_type, protocol, domain) = split_service_type(ty_domain).unwrap_or_default();
    ServiceRecord {
        service_type,
        protocol,
        domain,
        full_name: Some(fullname.to_string()),
        ..ServiceRecord::named(instance_name(ty_domain, fullname))
    }
}

fn record_from_info(info: &ServiceInfo) -> ServiceRecord {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort_by_key(|addr| (addr.is_ipv6(), *addr));

    let host = info.get_hostname();
    ServiceRecord {
        host: (!host.is_empty()).then(|| host.to_string()),
        port: info.get_port(),
        addresses: addresses.iter().map(IpAddr::to_string).collect(),
        txt: info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect(),
        ..record_from_name(info.get_type(), info.get_fullname())
    }
}
