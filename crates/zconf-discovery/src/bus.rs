//! Raw event routing between backends and the registry.
//!
//! Backends call [`RawEventBus::emit`] from whatever thread they run on. The
//! bus keeps at most one route per [`RawEventKind`]; routes are added and
//! removed as a [`ListenerSet`], never one at a time. Routed events are queued
//! on a bounded channel drained by a single processing task.

use crate::error::{DiscoveryError, Result};
use crate::events::{BackendEvent, RawEventKind};
use async_channel::TrySendError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Item carried on the registry's event channel.
#[derive(Debug)]
pub(crate) enum Envelope {
    /// A routed event, stamped with the session epoch at emission time
    Event { epoch: u64, event: BackendEvent },
    /// Completes once every envelope queued before it has been handled
    Flush(oneshot::Sender<()>),
}

/// Producer side of the registry's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: async_channel::Sender<Envelope>,
    epoch: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub(crate) fn new(tx: async_channel::Sender<Envelope>, epoch: Arc<AtomicU64>) -> Self {
        Self {
            tx,
            epoch,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of events dropped because the channel was full. Shared by
    /// every clone of this sink.
    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    fn deliver(&self, event: BackendEvent) -> bool {
        let envelope = Envelope::Event {
            epoch: self.epoch.load(Ordering::SeqCst),
            event,
        };

        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(Envelope::Event { event, .. })) => {
                warn!(kind = %event.kind(), "Event channel full, dropping event");
                self.dropped.fetch_add(1, Ordering::SeqCst);
                false
            }
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                debug!("Event channel closed, dropping event");
                false
            }
        }
    }

    /// Waits until everything queued before this call has been processed.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

#[derive(Debug)]
struct Route {
    set_id: u64,
    sink: EventSink,
}

/// Shared entry point for every backend's notifications.
#[derive(Debug, Default)]
pub struct RawEventBus {
    routes: Mutex<HashMap<RawEventKind, Route>>,
    next_set_id: AtomicU64,
}

impl RawEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes every kind in `kinds` to `sink`.
    ///
    /// Either every kind is routed or none is: if any kind already has a live
    /// route the bus is left untouched and `ListenersAlreadyAttached` is
    /// returned.
    pub fn attach(
        self: &Arc<Self>,
        kinds: &[RawEventKind],
        sink: EventSink,
    ) -> Result<ListenerSet> {
        let mut routes = self.routes.lock();
        if kinds.iter().any(|kind| routes.contains_key(kind)) {
            return Err(DiscoveryError::ListenersAlreadyAttached);
        }

        let set_id = self.next_set_id.fetch_add(1, Ordering::SeqCst);
        for kind in kinds {
            routes.insert(
                *kind,
                Route {
                    set_id,
                    sink: sink.clone(),
                },
            );
        }
        debug!(set_id, kinds = ?kinds, "Listener set attached");

        Ok(ListenerSet {
            bus: Arc::clone(self),
            set_id,
            kinds: kinds.to_vec(),
            released: false,
        })
    }

    /// Returns true if `kind` currently has a live route.
    pub fn is_routed(&self, kind: RawEventKind) -> bool {
        self.routes.lock().contains_key(&kind)
    }

    /// Delivers a backend event to whichever listener set routes its kind.
    ///
    /// Returns false when the event was dropped: it failed validation, nothing
    /// routes its kind, or the channel is full.
    pub fn emit(&self, event: BackendEvent) -> bool {
        let event = match event.validate() {
            Ok(event) => event,
            Err(e) => {
                trace!(error = %e, "Dropping malformed event");
                return false;
            }
        };

        let sink = {
            let routes = self.routes.lock();
            routes.get(&event.kind()).map(|route| route.sink.clone())
        };

        match sink {
            Some(sink) => sink.deliver(event),
            None => {
                trace!(kind = %event.kind(), "No listener for event, dropping");
                false
            }
        }
    }

    /// Validates a loosely shaped payload and emits it.
    pub fn emit_raw(&self, kind: RawEventKind, payload: serde_json::Value) -> bool {
        match BackendEvent::from_payload(kind, payload) {
            Ok(event) => self.emit(event),
            Err(e) => {
                trace!(error = %e, "Dropping malformed payload");
                false
            }
        }
    }

    fn release(&self, set_id: u64, kinds: &[RawEventKind]) {
        let mut routes = self.routes.lock();
        for kind in kinds {
            if routes.get(kind).is_some_and(|route| route.set_id == set_id) {
                routes.remove(kind);
            }
        }
        debug!(set_id, "Listener set released");
    }
}

/// A group of routes attached and released as one unit.
///
/// Dropping the set releases it.
#[derive(Debug)]
pub struct ListenerSet {
    bus: Arc<RawEventBus>,
    set_id: u64,
    kinds: Vec<RawEventKind>,
    released: bool,
}

impl ListenerSet {
    pub fn kinds(&self) -> &[RawEventKind] {
        &self.kinds
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.bus.release(self.set_id, &self.kinds);
        }
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zconf_core::ServiceRecord;

    fn sink(capacity: usize) -> (EventSink, async_channel::Receiver<Envelope>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (EventSink::new(tx, Arc::new(AtomicU64::new(0))), rx)
    }

    #[test]
    fn test_attach_is_all_or_nothing() {
        let bus = Arc::new(RawEventBus::new());
        let (sink, _rx) = sink(8);

        let control = bus
            .attach(&[RawEventKind::Start, RawEventKind::Stop], sink.clone())
            .unwrap();

        let result = bus.attach(&[RawEventKind::Found, RawEventKind::Stop], sink);
        assert!(matches!(
            result,
            Err(DiscoveryError::ListenersAlreadyAttached)
        ));
        assert!(!bus.is_routed(RawEventKind::Found));

        control.release();
        assert!(!bus.is_routed(RawEventKind::Start));
        assert!(!bus.is_routed(RawEventKind::Stop));
    }

    #[test]
    fn test_drop_releases_routes() {
        let bus = Arc::new(RawEventBus::new());
        let (sink, _rx) = sink(8);

        {
            let _set = bus.attach(&RawEventKind::SESSION, sink.clone()).unwrap();
            assert!(bus.is_routed(RawEventKind::Removed));
        }
        assert!(!bus.is_routed(RawEventKind::Removed));
        assert!(bus.attach(&RawEventKind::SESSION, sink).is_ok());
    }

    #[test]
    fn test_emit_routes_and_stamps_epoch() {
        let bus = Arc::new(RawEventBus::new());
        let (tx, rx) = async_channel::bounded(8);
        let epoch = Arc::new(AtomicU64::new(7));
        let _set = bus
            .attach(&RawEventKind::SESSION, EventSink::new(tx, epoch))
            .unwrap();

        assert!(bus.emit(BackendEvent::Found(ServiceRecord::named("printer-1"))));
        assert!(!bus.emit(BackendEvent::Start));

        match rx.try_recv().unwrap() {
            Envelope::Event { epoch, event } => {
                assert_eq!(epoch, 7);
                assert_eq!(event.kind(), RawEventKind::Found);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_payload_dropped() {
        let bus = Arc::new(RawEventBus::new());
        let (sink, rx) = sink(8);
        let _set = bus.attach(&RawEventKind::SESSION, sink).unwrap();

        assert!(!bus.emit_raw(RawEventKind::Found, json!({ "port": 80 })));
        assert!(!bus.emit(BackendEvent::Removed(ServiceRecord::named(""))));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_full_channel_drops_event() {
        let bus = Arc::new(RawEventBus::new());
        let (sink, rx) = sink(1);
        let _set = bus.attach(&RawEventKind::SESSION, sink).unwrap();

        assert!(bus.emit(BackendEvent::Found(ServiceRecord::named("a"))));
        assert!(!bus.emit(BackendEvent::Found(ServiceRecord::named("b"))));
        assert_eq!(rx.len(), 1);
    }
}
