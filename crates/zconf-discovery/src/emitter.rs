//! Per-kind subscriber lists for semantic events.

use crate::events::{EventKind, ZeroconfEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<ZeroconfEvent>,
}

/// Delivers [`ZeroconfEvent`]s to the subscribers registered for their kind.
///
/// Subscribers whose stream has been dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventEmitter {
    subscribers: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the given kinds. Each event is delivered once per
    /// stream even if the kind is listed twice.
    pub fn subscribe(&self, kinds: &[EventKind]) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        for kind in kinds {
            let list = subscribers.entry(*kind).or_default();
            if !list.iter().any(|s| s.id == id) {
                list.push(Subscriber { id, tx: tx.clone() });
            }
        }

        EventStream { rx }
    }

    pub fn subscribe_all(&self) -> EventStream {
        self.subscribe(&EventKind::ALL)
    }

    pub fn emit(&self, event: ZeroconfEvent) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(&event.kind()) {
            list.retain(|subscriber| subscriber.tx.send(event.clone()).is_ok());
        }
    }

    /// Number of live subscribers for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .get(&kind)
            .map(|list| list.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ZeroconfEvent>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once the registry is gone.
    pub async fn recv(&mut self) -> Option<ZeroconfEvent> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ZeroconfEvent> {
        self.rx.try_recv().ok()
    }

    /// Drains every event queued so far.
    pub fn drain(&mut self) -> Vec<ZeroconfEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zconf_core::ServiceRecord;

    #[test]
    fn test_delivery_by_kind() {
        let emitter = EventEmitter::new();
        let mut updates = emitter.subscribe(&[EventKind::Update]);
        let mut all = emitter.subscribe_all();

        emitter.emit(ZeroconfEvent::Found(ServiceRecord::named("printer-1")));
        emitter.emit(ZeroconfEvent::Update);

        assert_eq!(updates.drain(), vec![ZeroconfEvent::Update]);
        assert_eq!(all.drain().len(), 2);
    }

    #[test]
    fn test_duplicate_kinds_deliver_once() {
        let emitter = EventEmitter::new();
        let mut stream = emitter.subscribe(&[EventKind::Start, EventKind::Start]);

        emitter.emit(ZeroconfEvent::Start);
        assert_eq!(stream.drain(), vec![ZeroconfEvent::Start]);
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let emitter = EventEmitter::new();
        let stream = emitter.subscribe(&[EventKind::Stop]);
        assert_eq!(emitter.subscriber_count(EventKind::Stop), 1);

        drop(stream);
        emitter.emit(ZeroconfEvent::Stop);
        assert_eq!(emitter.subscriber_count(EventKind::Stop), 0);
    }
}
