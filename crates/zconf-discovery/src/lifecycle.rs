//! Attach/detach state machine for the session listener set.

use crate::bus::{EventSink, ListenerSet, RawEventBus};
use crate::error::DiscoveryError;
use crate::events::RawEventKind;
use crate::registry::ServiceRegistry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Owns the listener set that routes catalog-mutating events for one scan.
///
/// The controller is either idle or attached. A redundant `attach` leaves the
/// existing set in place and reports `ListenersAlreadyAttached` through the
/// registry's `error` event. Every `detach` closes the registry's session
/// and advances the epoch, so events queued under the old set are discarded.
#[derive(Debug)]
pub struct ListenerLifecycleController {
    bus: Arc<RawEventBus>,
    sink: EventSink,
    active: Mutex<Option<ListenerSet>>,
    epoch: Arc<AtomicU64>,
    registry: Arc<ServiceRegistry>,
}

impl ListenerLifecycleController {
    pub(crate) fn new(
        bus: Arc<RawEventBus>,
        sink: EventSink,
        epoch: Arc<AtomicU64>,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            bus,
            sink,
            active: Mutex::new(None),
            epoch,
            registry,
        }
    }

    /// Attaches the session listener set. Returns false if nothing changed.
    pub fn attach(&self) -> bool {
        let outcome = {
            let mut active = self.active.lock();
            if active.is_some() {
                Err(DiscoveryError::ListenersAlreadyAttached)
            } else {
                self.bus
                    .attach(&RawEventKind::SESSION, self.sink.clone())
                    .map(|set| *active = Some(set))
            }
        };

        match outcome {
            Ok(()) => {
                debug!(epoch = self.current_epoch(), "Session listeners attached");
                true
            }
            Err(e) => {
                self.registry.report_error(e);
                false
            }
        }
    }

    /// Releases the session listener set. Safe to call when idle.
    ///
    /// No catalog-mutating event is applied once this returns.
    pub fn detach(&self) {
        self.registry.close_session();
        let released = self.active.lock().take();
        self.advance_epoch();
        if let Some(set) = released {
            set.release();
            debug!(epoch = self.current_epoch(), "Session listeners detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Starts a new epoch; events stamped with an older one are rejected.
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}
