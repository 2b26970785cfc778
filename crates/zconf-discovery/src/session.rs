//! The public discovery controller.

use crate::backend::{BackendFactory, DiscoveryBackend};
use crate::bus::{Envelope, EventSink, ListenerSet, RawEventBus};
use crate::emitter::EventStream;
use crate::error::{DiscoveryError, Result};
use crate::events::{EventKind, RawEventKind};
use crate::lifecycle::ListenerLifecycleController;
use crate::registry::ServiceRegistry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use zconf_core::{
    DiscoveryConfig, ImplementationHint, PublishRequest, ScanRequest, ServiceCatalog, Session,
};

/// Scans for and advertises services, keeping the results in a
/// [`ServiceRegistry`].
///
/// Command methods never fail: anything that goes wrong is delivered to
/// subscribers as an `error` event. Backend notifications are queued on a
/// bounded channel and applied in arrival order by a background task, so a
/// tokio runtime must be running when the controller is built.
///
/// # Example
///
/// ```no_run
/// use zconf_discovery::{EventKind, ScanRequest, Zeroconf, ZeroconfEvent};
///
/// # async fn run() -> zconf_discovery::Result<()> {
/// let zeroconf = Zeroconf::new(Default::default())?;
/// let mut events = zeroconf.subscribe(&[EventKind::Resolved]);
///
/// zeroconf.scan(ScanRequest::new("ipp", "tcp", "local."));
/// if let Some(ZeroconfEvent::Resolved(record)) = events.recv().await {
///     println!("{} on port {}", record.name, record.port);
/// }
/// zeroconf.stop();
/// # Ok(())
/// # }
/// ```
pub struct Zeroconf {
    config: DiscoveryConfig,
    bus: Arc<RawEventBus>,
    registry: Arc<ServiceRegistry>,
    lifecycle: Arc<ListenerLifecycleController>,
    backends: BackendFactory,
    sink: EventSink,
    session: Mutex<Option<Session>>,
    registrations: Mutex<HashSet<(ImplementationHint, String)>>,
    control: Mutex<Option<ListenerSet>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Zeroconf {
    /// Creates a controller with the built-in backends.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: DiscoveryConfig) -> ZeroconfBuilder {
        ZeroconfBuilder::new(config)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Scan request built from the configured defaults.
    pub fn default_scan(&self) -> ScanRequest {
        self.config.default_scan()
    }

    /// Starts a scan, replacing any scan already running.
    ///
    /// The discovered and resolved catalogs are empty when this returns.
    /// Re-scanning without a `stop` keeps the attached listener set and
    /// reports `ListenersAlreadyAttached` once.
    pub fn scan(&self, request: ScanRequest) {
        let backend = match self.backends.get(&request.implementation) {
            Ok(backend) => backend,
            Err(e) => {
                self.registry.report_error(e);
                return;
            }
        };

        let mut session = self.session.lock();
        if let Some(previous) = session.as_ref() {
            if previous.implementation() != &request.implementation {
                self.end_scan(previous.implementation());
            }
        }

        let epoch = self.lifecycle.advance_epoch();
        self.registry.open_session(epoch, Some(request.clone()));
        self.lifecycle.attach();

        let next = Session::new(request);
        info!(
            session = %next.id,
            service_type = %next.request.service_type_string(),
            hint = %next.implementation(),
            "Starting scan"
        );

        if let Err(e) = backend.begin_scan(&next.request) {
            self.registry.report_error(e);
            self.lifecycle.detach();
            *session = None;
            return;
        }
        *session = Some(next);
    }

    /// Stops the active scan, whichever backend runs it.
    pub fn stop(&self) {
        let hint = self
            .session
            .lock()
            .as_ref()
            .map(|session| session.implementation().clone());

        match hint {
            Some(hint) => self.stop_implementation(&hint),
            None => debug!("No active scan, ignoring stop"),
        }
    }

    /// Stops the active scan if it runs on `hint`; otherwise does nothing.
    pub fn stop_implementation(&self, hint: &ImplementationHint) {
        let mut session = self.session.lock();
        match session.as_ref() {
            Some(active) if active.implementation() == hint => {}
            Some(active) => {
                debug!(hint = %hint, active = %active.implementation(), "Scan runs elsewhere, ignoring stop");
                return;
            }
            None => {
                debug!(hint = %hint, "No active scan, ignoring stop");
                return;
            }
        }

        self.end_scan(hint);
        self.lifecycle.detach();
        if let Some(stopped) = session.take() {
            info!(session = %stopped.id, "Scan stopped");
        }
    }

    /// Advertises a service.
    pub fn publish_service(&self, request: PublishRequest) {
        if let Err(reason) = request.validate() {
            self.registry
                .report_error(DiscoveryError::InvalidRequest { reason });
            return;
        }

        let backend = match self.backends.get(&request.implementation) {
            Ok(backend) => backend,
            Err(e) => {
                self.registry.report_error(e);
                return;
            }
        };

        match backend.register_service(&request) {
            Ok(()) => {
                debug!(name = %request.name, hint = %request.implementation, "Publish requested");
                self.registrations
                    .lock()
                    .insert((request.implementation, request.name));
            }
            Err(e) => self.registry.report_error(e),
        }
    }

    /// Withdraws a service published through `hint`. Unknown names are
    /// ignored.
    pub fn unpublish_service(&self, name: &str, hint: &ImplementationHint) {
        let known = self
            .registrations
            .lock()
            .remove(&(hint.clone(), name.to_string()));
        if !known {
            debug!(name, hint = %hint, "Service not published, ignoring unpublish");
            return;
        }
        self.unregister(hint, name);
    }

    pub fn get_services(&self) -> ServiceCatalog {
        self.registry.get_services()
    }

    pub fn get_resolved_services(&self) -> ServiceCatalog {
        self.registry.get_resolved_services()
    }

    pub fn get_published_services(&self) -> ServiceCatalog {
        self.registry.get_published_services()
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> EventStream {
        self.registry.subscribe(kinds)
    }

    pub fn subscribe_all(&self) -> EventStream {
        self.registry.subscribe_all()
    }

    /// The active scan, if any.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn listeners_attached(&self) -> bool {
        self.lifecycle.is_attached()
    }

    /// The bus every backend reports on. Events emitted here are handled
    /// exactly like backend notifications.
    pub fn event_bus(&self) -> Arc<RawEventBus> {
        Arc::clone(&self.bus)
    }

    /// Resolves once every event queued before the call has been applied.
    pub async fn settled(&self) {
        self.sink.flush().await;
    }

    /// Stops scanning, withdraws every published service and ends the
    /// processing task.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("Shutting down discovery");

        self.stop();
        let registrations: Vec<_> = self.registrations.lock().drain().collect();
        for (hint, name) in registrations {
            self.unregister(&hint, &name);
        }
        self.settled().await;

        for backend in self.backends.instances() {
            if let Err(e) = backend.shutdown() {
                warn!(hint = %backend.hint(), error = %e, "Backend shutdown failed");
            }
        }

        if let Some(control) = self.control.lock().take() {
            control.release();
        }
        self.cancel.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    fn end_scan(&self, hint: &ImplementationHint) {
        let result = self
            .backends
            .get(hint)
            .and_then(|backend| backend.end_scan());
        if let Err(e) = result {
            self.registry.report_error(e);
        }
    }

    fn unregister(&self, hint: &ImplementationHint, name: &str) {
        let result = self
            .backends
            .get(hint)
            .and_then(|backend| backend.unregister_service(name));
        if let Err(e) = result {
            self.registry.report_error(e);
        }
    }
}

impl Drop for Zeroconf {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Configures backends before the controller starts.
pub struct ZeroconfBuilder {
    config: DiscoveryConfig,
    extra: Vec<(ImplementationHint, crate::backend::BackendConstructor)>,
}

impl ZeroconfBuilder {
    fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            extra: Vec::new(),
        }
    }

    /// Registers an additional backend, or replaces a built-in one.
    pub fn backend<F>(mut self, hint: impl Into<ImplementationHint>, constructor: F) -> Self
    where
        F: Fn(Arc<RawEventBus>, &DiscoveryConfig) -> Result<Arc<dyn DiscoveryBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.extra.push((hint.into(), Box::new(constructor)));
        self
    }

    /// Builds the controller and starts its processing task.
    pub fn build(self) -> Result<Zeroconf> {
        let config = self.config;
        config
            .validate()
            .map_err(|reason| DiscoveryError::InvalidConfig { reason })?;
        let runtime = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;

        let bus = Arc::new(RawEventBus::new());
        let (tx, rx) = async_channel::bounded(config.event_channel_capacity);
        let epoch = Arc::new(AtomicU64::new(0));
        let sink = EventSink::new(tx, Arc::clone(&epoch));

        let registry = Arc::new(ServiceRegistry::from_config(&config));
        let lifecycle = Arc::new(ListenerLifecycleController::new(
            Arc::clone(&bus),
            sink.clone(),
            epoch,
            Arc::clone(&registry),
        ));
        let control = bus.attach(&RawEventKind::CONTROL, sink.clone())?;

        let mut backends = BackendFactory::new(Arc::clone(&bus), config.clone());
        for (hint, constructor) in self.extra {
            backends.register(hint, constructor);
        }

        let cancel = CancellationToken::new();
        let worker = runtime.spawn(process_events(
            rx,
            Arc::clone(&registry),
            sink.dropped_counter(),
            cancel.clone(),
        ));

        info!(
            default_hint = %config.default_implementation,
            capacity = config.event_channel_capacity,
            "Discovery controller created"
        );

        Ok(Zeroconf {
            config,
            bus,
            registry,
            lifecycle,
            backends,
            sink,
            session: Mutex::new(None),
            registrations: Mutex::new(HashSet::new()),
            control: Mutex::new(Some(control)),
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Applies queued events to the registry one at a time.
///
/// Events dropped on a full channel are reported as a single `error` before
/// the next envelope is handled.
async fn process_events(
    rx: async_channel::Receiver<Envelope>,
    registry: Arc<ServiceRegistry>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    debug!("Event processor started");

    loop {
        let deadline = registry.next_removal_deadline();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = removal_timer(deadline) => {
                registry.expire_removals(Instant::now());
            }

            envelope = rx.recv() => {
                let count = dropped.swap(0, Ordering::SeqCst);
                if count > 0 {
                    registry.report_error(DiscoveryError::EventsDropped { count });
                }

                match envelope {
                    Ok(Envelope::Event { epoch, event }) => {
                        let kind = event.kind();
                        if !registry.apply_stamped(epoch, event) {
                            trace!(kind = %kind, epoch, "Discarded event outside the open session");
                        }
                    }
                    Ok(Envelope::Flush(done)) => {
                        let _ = done.send(());
                    }
                    Err(_) => break,
                }
            }
        }
    }

    debug!("Event processor stopped");
}

async fn removal_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
