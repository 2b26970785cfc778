//! Service catalogs and the handlers that mutate them.

use crate::emitter::{EventEmitter, EventStream};
use crate::error::DiscoveryError;
use crate::events::{BackendEvent, EventKind, ZeroconfEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use zconf_core::{DiscoveryConfig, ScanRequest, ServiceCatalog, ServiceRecord};

#[derive(Debug, Default)]
struct Catalogs {
    discovered: ServiceCatalog,
    resolved: ServiceCatalog,
    published: ServiceCatalog,
    pending_removals: HashMap<String, PendingRemoval>,
    session: Option<SessionGate>,
}

impl Catalogs {
    fn clear_discovery(&mut self) {
        self.discovered.clear();
        self.resolved.clear();
        self.pending_removals.clear();
    }
}

/// Which stamped events the discovered and resolved catalogs accept.
#[derive(Debug)]
struct SessionGate {
    epoch: u64,
    scope: Option<ScanRequest>,
}

impl SessionGate {
    fn admits(&self, epoch: u64, record: &ServiceRecord) -> bool {
        self.epoch == epoch
            && self
                .scope
                .as_ref()
                .map_or(true, |scope| scope.admits(record))
    }
}

#[derive(Debug)]
struct PendingRemoval {
    deadline: Instant,
    record: ServiceRecord,
}

/// Holds the discovered, resolved and published catalogs and emits a
/// semantic event for every change.
///
/// Each handler applies one event under a single lock and emits only after
/// the lock is released, so subscribers always observe the post-event state.
/// Readers get cloned snapshots.
///
/// Events arriving from a scan go through [`ServiceRegistry::apply_stamped`],
/// which checks the session epoch and scan scope under the same lock that
/// guards the catalogs. Opening or closing a session therefore takes effect
/// atomically with respect to every catalog mutation.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    catalogs: Mutex<Catalogs>,
    emitter: EventEmitter,
    remove_debounce: Duration,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new().with_remove_debounce(config.remove_debounce())
    }

    /// Holds `removed` events for `debounce` before applying them.
    pub fn with_remove_debounce(mut self, debounce: Duration) -> Self {
        self.remove_debounce = debounce;
        self
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> EventStream {
        self.emitter.subscribe(kinds)
    }

    pub fn subscribe_all(&self) -> EventStream {
        self.emitter.subscribe_all()
    }

    /// Opens the catalogs to events stamped with `epoch`, discarding
    /// everything discovered before. Records that name a class other than
    /// `scope` are ignored while the session lasts.
    pub fn open_session(&self, epoch: u64, scope: Option<ScanRequest>) {
        {
            let mut catalogs = self.catalogs.lock();
            catalogs.clear_discovery();
            catalogs.session = Some(SessionGate { epoch, scope });
        }

        debug!(epoch, "Catalogs reset for new session");
        self.emitter.emit(ZeroconfEvent::Update);
    }

    /// Closes the catalogs to stamped events. The catalogs keep their
    /// contents. Once this returns no stamped event is applied until the next
    /// [`ServiceRegistry::open_session`].
    pub fn close_session(&self) {
        if let Some(gate) = self.catalogs.lock().session.take() {
            debug!(epoch = gate.epoch, "Session closed");
        }
    }

    /// Epoch of the open session, if any.
    pub fn session_epoch(&self) -> Option<u64> {
        self.catalogs.lock().session.as_ref().map(|gate| gate.epoch)
    }

    /// Applies an event stamped with the session epoch current when the
    /// backend emitted it.
    ///
    /// Catalog-mutating events are dropped unless a session with that epoch is
    /// open and the record falls within its scope. Other kinds are applied
    /// unconditionally. Returns false if the event was dropped.
    pub fn apply_stamped(&self, epoch: u64, event: BackendEvent) -> bool {
        let gate = Some(epoch);
        match event {
            BackendEvent::Found(record) => self.found(gate, record),
            BackendEvent::Resolved(record) => self.resolved(gate, record),
            BackendEvent::Removed(record) => self.removed(gate, record),
            other => {
                self.apply(other);
                true
            }
        }
    }

    /// Dispatches a backend event to its handler.
    pub fn apply(&self, event: BackendEvent) {
        match event {
            BackendEvent::Start => self.on_start(),
            BackendEvent::Stop => self.on_stop(),
            BackendEvent::Error { message } => self.on_error(message),
            BackendEvent::Found(record) => self.on_found(record),
            BackendEvent::Resolved(record) => self.on_resolved(record),
            BackendEvent::Removed(record) => self.on_removed(record),
            BackendEvent::Published(record) => self.on_published(record),
            BackendEvent::Unpublished(record) => self.on_unpublished(record),
        }
    }

    pub fn on_start(&self) {
        info!("Discovery started");
        self.emitter.emit(ZeroconfEvent::Start);
    }

    pub fn on_stop(&self) {
        info!("Discovery stopped");
        self.emitter.emit(ZeroconfEvent::Stop);
    }

    /// Forwards a native failure verbatim.
    pub fn on_error(&self, message: impl Into<String>) {
        self.report_error(DiscoveryError::backend(message));
    }

    pub fn report_error(&self, error: DiscoveryError) {
        warn!(error = %error, "Discovery error");
        self.emitter.emit(ZeroconfEvent::Error(error));
    }

    /// Records a discovery hit.
    ///
    /// An unresolved hit does not replace a record that is already resolved.
    pub fn on_found(&self, record: ServiceRecord) {
        self.found(None, record);
    }

    fn found(&self, gate: Option<u64>, record: ServiceRecord) -> bool {
        if !has_name(&record) {
            return false;
        }

        {
            let mut catalogs = self.catalogs.lock();
            if !admitted(&catalogs, gate, &record) {
                return false;
            }
            catalogs.pending_removals.remove(&record.name);

            let keep_resolved = !record.is_resolved()
                && catalogs
                    .discovered
                    .get(&record.name)
                    .is_some_and(ServiceRecord::is_resolved);
            if !keep_resolved {
                catalogs
                    .discovered
                    .insert(record.name.clone(), record.clone());
            }
        }

        debug!(name = %record.name, "Service found");
        self.emitter.emit(ZeroconfEvent::Found(record));
        self.emitter.emit(ZeroconfEvent::Update);
        true
    }

    /// Records a fully resolved service in both catalogs.
    pub fn on_resolved(&self, record: ServiceRecord) {
        self.resolved(None, record);
    }

    fn resolved(&self, gate: Option<u64>, record: ServiceRecord) -> bool {
        if !has_name(&record) {
            return false;
        }

        {
            let mut catalogs = self.catalogs.lock();
            if !admitted(&catalogs, gate, &record) {
                return false;
            }
            catalogs.pending_removals.remove(&record.name);
            catalogs
                .discovered
                .insert(record.name.clone(), record.clone());
            catalogs
                .resolved
                .insert(record.name.clone(), record.clone());
        }

        debug!(
            name = %record.name,
            port = record.port,
            address = record.primary_address().unwrap_or("-"),
            "Service resolved"
        );
        self.emitter.emit(ZeroconfEvent::Resolved(record));
        self.emitter.emit(ZeroconfEvent::Update);
        true
    }

    /// Drops a service from the discovered and resolved catalogs.
    ///
    /// With a removal debounce configured, a known service is only scheduled
    /// for removal; see [`ServiceRegistry::expire_removals`].
    pub fn on_removed(&self, record: ServiceRecord) {
        self.removed(None, record);
    }

    fn removed(&self, gate: Option<u64>, record: ServiceRecord) -> bool {
        if !has_name(&record) {
            return false;
        }

        {
            let mut catalogs = self.catalogs.lock();
            if !admitted(&catalogs, gate, &record) {
                return false;
            }
            if !self.remove_debounce.is_zero() && catalogs.discovered.contains_key(&record.name) {
                debug!(name = %record.name, "Service removal scheduled");
                let deadline = Instant::now() + self.remove_debounce;
                catalogs
                    .pending_removals
                    .insert(record.name.clone(), PendingRemoval { deadline, record });
                return true;
            }

            catalogs.discovered.remove(&record.name);
            catalogs.resolved.remove(&record.name);
        }

        debug!(name = %record.name, "Service removed");
        self.emitter.emit(ZeroconfEvent::Remove(record));
        self.emitter.emit(ZeroconfEvent::Update);
        true
    }

    pub fn on_published(&self, record: ServiceRecord) {
        if !has_name(&record) {
            return;
        }

        self.catalogs
            .lock()
            .published
            .insert(record.name.clone(), record.clone());

        info!(name = %record.name, port = record.port, "Service published");
        self.emitter.emit(ZeroconfEvent::Published(record));
    }

    pub fn on_unpublished(&self, record: ServiceRecord) {
        if !has_name(&record) {
            return;
        }

        self.catalogs.lock().published.remove(&record.name);

        info!(name = %record.name, "Service unpublished");
        self.emitter.emit(ZeroconfEvent::Unpublished(record));
    }

    /// Clears the discovered and resolved catalogs along with any pending
    /// removals. The published catalog is left alone.
    pub fn reset(&self) {
        self.catalogs.lock().clear_discovery();

        debug!("Catalogs reset");
        self.emitter.emit(ZeroconfEvent::Update);
    }

    /// Earliest deadline among scheduled removals.
    pub fn next_removal_deadline(&self) -> Option<Instant> {
        self.catalogs
            .lock()
            .pending_removals
            .values()
            .map(|pending| pending.deadline)
            .min()
    }

    /// Applies every scheduled removal whose deadline is at or before `now`.
    /// Returns how many were applied.
    pub fn expire_removals(&self, now: Instant) -> usize {
        let expired: Vec<ServiceRecord> = {
            let mut catalogs = self.catalogs.lock();
            let due: Vec<String> = catalogs
                .pending_removals
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(name, _)| name.clone())
                .collect();

            due.into_iter()
                .filter_map(|name| {
                    let pending = catalogs.pending_removals.remove(&name)?;
                    catalogs.discovered.remove(&name);
                    catalogs.resolved.remove(&name);
                    Some(pending.record)
                })
                .collect()
        };

        for record in &expired {
            debug!(name = %record.name, "Service removed");
            self.emitter.emit(ZeroconfEvent::Remove(record.clone()));
            self.emitter.emit(ZeroconfEvent::Update);
        }
        expired.len()
    }

    /// Snapshot of every discovered service, resolved or not.
    pub fn get_services(&self) -> ServiceCatalog {
        self.catalogs.lock().discovered.clone()
    }

    pub fn get_resolved_services(&self) -> ServiceCatalog {
        self.catalogs.lock().resolved.clone()
    }

    pub fn get_published_services(&self) -> ServiceCatalog {
        self.catalogs.lock().published.clone()
    }
}

/// Ungated calls always pass; stamped ones need a matching open session.
fn admitted(catalogs: &Catalogs, gate: Option<u64>, record: &ServiceRecord) -> bool {
    let Some(epoch) = gate else {
        return true;
    };
    let admitted = catalogs
        .session
        .as_ref()
        .is_some_and(|session| session.admits(epoch, record));
    if !admitted {
        trace!(name = %record.name, epoch, "Discarding event outside the open session");
    }
    admitted
}

fn has_name(record: &ServiceRecord) -> bool {
    if record.name.trim().is_empty() {
        trace!("Dropping record without a name");
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(name: &str, port: u16, address: &str) -> ServiceRecord {
        ServiceRecord {
            port,
            addresses: vec![address.to_string()],
            ..ServiceRecord::named(name)
        }
    }

    #[test]
    fn test_found_then_resolved() {
        let registry = ServiceRegistry::new();

        registry.on_found(ServiceRecord::named("printer-1"));
        assert!(registry.get_services().contains_key("printer-1"));
        assert!(registry.get_resolved_services().is_empty());

        registry.on_resolved(resolved("printer-1", 9100, "192.168.1.5"));
        assert_eq!(registry.get_services()["printer-1"].port, 9100);
        assert_eq!(registry.get_resolved_services()["printer-1"].port, 9100);
    }

    #[test]
    fn test_resolved_before_found() {
        let registry = ServiceRegistry::new();

        registry.on_resolved(resolved("nas", 445, "10.0.0.2"));
        registry.on_found(ServiceRecord::named("nas"));

        let services = registry.get_services();
        assert_eq!(services["nas"].addresses, vec!["10.0.0.2".to_string()]);
        assert!(registry.get_resolved_services().contains_key("nas"));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = ServiceRegistry::new();
        let mut events = registry.subscribe_all();

        registry.on_removed(ServiceRecord::named("ghost"));

        assert!(registry.get_services().is_empty());
        assert_eq!(
            events.drain(),
            vec![
                ZeroconfEvent::Remove(ServiceRecord::named("ghost")),
                ZeroconfEvent::Update
            ]
        );
    }

    #[test]
    fn test_event_order() {
        let registry = ServiceRegistry::new();
        let mut events = registry.subscribe_all();
        let record = resolved("printer-1", 9100, "192.168.1.5");

        registry.on_resolved(record.clone());
        registry.on_removed(record.clone());

        let kinds: Vec<EventKind> = events.drain().iter().map(ZeroconfEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Resolved,
                EventKind::Update,
                EventKind::Remove,
                EventKind::Update
            ]
        );
    }

    #[test]
    fn test_nameless_records_ignored() {
        let registry = ServiceRegistry::new();
        let mut events = registry.subscribe_all();

        registry.on_found(ServiceRecord::named(""));
        registry.on_resolved(ServiceRecord::named("  "));
        registry.on_published(ServiceRecord::named(""));

        assert!(registry.get_services().is_empty());
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_reset_keeps_published() {
        let registry = ServiceRegistry::new();
        registry.on_found(ServiceRecord::named("printer-1"));
        registry.on_published(ServiceRecord::named("web"));

        registry.reset();

        assert!(registry.get_services().is_empty());
        assert!(registry.get_resolved_services().is_empty());
        assert!(registry.get_published_services().contains_key("web"));

        registry.on_unpublished(ServiceRecord::named("web"));
        assert!(registry.get_published_services().is_empty());
    }

    #[test]
    fn test_backend_error_forwarded_verbatim() {
        let registry = ServiceRegistry::new();
        let mut errors = registry.subscribe(&[EventKind::Error]);

        registry.apply(BackendEvent::error("network unavailable"));

        match errors.try_recv() {
            Some(ZeroconfEvent::Error(err)) => assert_eq!(err.to_string(), "network unavailable"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_debounced_removal() {
        let registry = ServiceRegistry::new().with_remove_debounce(Duration::from_millis(500));
        registry.on_resolved(resolved("printer-1", 9100, "192.168.1.5"));
        registry.on_found(ServiceRecord::named("scanner"));

        registry.on_removed(ServiceRecord::named("printer-1"));
        registry.on_removed(ServiceRecord::named("scanner"));
        assert_eq!(registry.get_services().len(), 2);
        assert!(registry.next_removal_deadline().is_some());

        // A re-announce inside the window cancels the removal.
        registry.on_resolved(resolved("printer-1", 9100, "192.168.1.5"));

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(registry.expire_removals(later), 1);
        assert!(registry.get_services().contains_key("printer-1"));
        assert!(!registry.get_services().contains_key("scanner"));
        assert!(registry.next_removal_deadline().is_none());
    }

    #[test]
    fn test_stamped_events_need_open_session() {
        let registry = ServiceRegistry::new();
        let found = |name: &str| BackendEvent::Found(ServiceRecord::named(name));

        assert!(!registry.apply_stamped(1, found("early")));

        registry.open_session(1, None);
        assert!(registry.apply_stamped(1, found("printer-1")));
        assert!(!registry.apply_stamped(0, found("stale")));

        registry.open_session(2, None);
        assert!(registry.get_services().is_empty());
        assert!(!registry.apply_stamped(1, found("previous")));
        assert!(registry.apply_stamped(2, found("current")));

        registry.close_session();
        assert_eq!(registry.session_epoch(), None);
        assert!(!registry.apply_stamped(2, BackendEvent::Removed(ServiceRecord::named("current"))));
        assert!(registry.get_services().contains_key("current"));

        // Control kinds are never gated.
        assert!(registry.apply_stamped(7, BackendEvent::Stop));
    }

    #[test]
    fn test_stamped_events_outside_scope_ignored() {
        let registry = ServiceRegistry::new();
        registry.open_session(1, Some(ScanRequest::new("ipp", "tcp", "local.")));

        let http = ServiceRecord {
            service_type: "http".to_string(),
            protocol: "tcp".to_string(),
            ..ServiceRecord::named("web")
        };
        let ipp = ServiceRecord {
            service_type: "ipp".to_string(),
            ..ServiceRecord::named("printer-1")
        };

        assert!(!registry.apply_stamped(1, BackendEvent::Found(http)));
        assert!(registry.apply_stamped(1, BackendEvent::Found(ipp)));
        assert!(registry.apply_stamped(1, BackendEvent::Found(ServiceRecord::named("bare"))));

        let mut names: Vec<String> = registry.get_services().into_keys().collect();
        names.sort();
        assert_eq!(names, vec!["bare".to_string(), "printer-1".to_string()]);
    }
}
