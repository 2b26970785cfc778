//! Catalog behavior under arbitrary interleavings of backend events.

use std::time::Duration;
use zconf_discovery::{
    BackendEvent, DiscoveryConfig, EventKind, ImplementationHint, ScanRequest, ServiceRecord,
    ServiceRegistry, Zeroconf, ZeroconfEvent,
};

fn resolved(name: &str) -> ServiceRecord {
    ServiceRecord {
        port: 9100,
        addresses: vec!["192.168.1.5".to_string()],
        ..ServiceRecord::named(name)
    }
}

fn apply_all(registry: &ServiceRegistry, events: &[BackendEvent]) {
    for event in events {
        registry.apply(event.clone());
    }
}

#[test]
fn test_removed_clears_both_catalogs() {
    let found = BackendEvent::Found(ServiceRecord::named("printer-1"));
    let res = BackendEvent::Resolved(resolved("printer-1"));
    let removed = BackendEvent::Removed(ServiceRecord::named("printer-1"));

    let histories = vec![
        vec![found.clone()],
        vec![res.clone()],
        vec![found.clone(), res.clone()],
        vec![res.clone(), found.clone()],
        vec![found.clone(), found.clone(), res.clone(), res.clone()],
        vec![res.clone(), removed.clone(), found.clone(), res.clone()],
        vec![],
    ];

    for history in histories {
        let registry = ServiceRegistry::new();
        apply_all(&registry, &history);
        registry.apply(removed.clone());

        assert!(
            !registry.get_services().contains_key("printer-1"),
            "history: {history:?}"
        );
        assert!(
            !registry.get_resolved_services().contains_key("printer-1"),
            "history: {history:?}"
        );
    }
}

#[test]
fn test_resolution_supersedes_discovery() {
    let registry = ServiceRegistry::new();

    registry.on_found(ServiceRecord::named("printer-1"));
    registry.on_resolved(resolved("printer-1"));
    assert!(!registry.get_services()["printer-1"].addresses.is_empty());

    // A later bare hit does not downgrade the resolved record.
    registry.on_found(ServiceRecord::named("printer-1"));
    assert!(!registry.get_services()["printer-1"].addresses.is_empty());
}

#[test]
fn test_resolved_is_subset_of_discovered() {
    let registry = ServiceRegistry::new();
    let events = [
        BackendEvent::Resolved(resolved("a")),
        BackendEvent::Found(ServiceRecord::named("b")),
        BackendEvent::Resolved(resolved("c")),
        BackendEvent::Removed(ServiceRecord::named("a")),
        BackendEvent::Removed(ServiceRecord::named("unknown")),
        BackendEvent::Resolved(resolved("b")),
    ];

    for event in events {
        registry.apply(event);
        let discovered = registry.get_services();
        for name in registry.get_resolved_services().keys() {
            assert!(discovered.contains_key(name));
        }
    }

    let mut names: Vec<String> = registry.get_services().into_keys().collect();
    names.sort();
    assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn test_repeated_resolved_overwrites() {
    let registry = ServiceRegistry::new();
    registry.on_resolved(resolved("printer-1"));
    registry.on_resolved(ServiceRecord {
        port: 631,
        ..resolved("printer-1")
    });

    assert_eq!(registry.get_services().len(), 1);
    assert_eq!(registry.get_resolved_services()["printer-1"].port, 631);
}

#[tokio::test(start_paused = true)]
async fn test_debounced_removal_through_controller() {
    let zeroconf = Zeroconf::new(DiscoveryConfig {
        default_implementation: ImplementationHint::loopback(),
        remove_debounce_ms: 500,
        ..Default::default()
    })
    .unwrap();
    let mut removals = zeroconf.subscribe(&[EventKind::Remove]);
    let bus = zeroconf.event_bus();

    zeroconf.scan(ScanRequest::default().with_implementation(ImplementationHint::loopback()));
    bus.emit(BackendEvent::Resolved(resolved("printer-1")));
    bus.emit(BackendEvent::Resolved(resolved("scanner")));
    zeroconf.settled().await;

    // printer-1 flaps and comes back inside the window; scanner really leaves.
    bus.emit(BackendEvent::Removed(ServiceRecord::named("printer-1")));
    bus.emit(BackendEvent::Removed(ServiceRecord::named("scanner")));
    zeroconf.settled().await;
    assert_eq!(zeroconf.get_services().len(), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    bus.emit(BackendEvent::Found(ServiceRecord::named("printer-1")));
    zeroconf.settled().await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    zeroconf.settled().await;

    let services = zeroconf.get_services();
    assert!(services.contains_key("printer-1"));
    assert!(!services.contains_key("scanner"));
    assert!(matches!(
        removals.try_recv(),
        Some(ZeroconfEvent::Remove(record)) if record.name == "scanner"
    ));
    assert!(removals.try_recv().is_none());
}
