// Inventory reconciliation: diffing, identity reuse, fault isolation

mod common;

use common::{active_connection, reconcile_tags, tick};
use virtwatch::backend::mock::MockBackend;
use virtwatch::models::{ConnState, DomainState, EntityKind, Event};

#[test]
fn first_cycle_adds_and_starts_running_guests() {
    let backend = MockBackend::new();
    let web = backend.define_guest("web");
    backend.start_guest(web);
    let build = backend.define_guest("build");

    let mut conn = active_connection(&backend);
    let events = tick(&mut conn, 1_000);

    assert_eq!(conn.domains.len(), 2);
    assert!(events.contains(&Event::EntityAdded {
        uuid: web,
        kind: EntityKind::Domain
    }));
    assert!(events.contains(&Event::EntityStarted {
        uuid: web,
        kind: EntityKind::Domain
    }));
    // defined-only guest is added but not started
    assert!(events.contains(&Event::EntityAdded {
        uuid: build,
        kind: EntityKind::Domain
    }));
    assert!(!events.contains(&Event::EntityStarted {
        uuid: build,
        kind: EntityKind::Domain
    }));
}

#[test]
fn identical_listings_yield_no_reconcile_events_and_keep_state() {
    let backend = MockBackend::new();
    let web = backend.define_guest("web");
    backend.start_guest(web);
    backend.define_guest("build");

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);
    let samples_before = conn.domains[&web].samples.len();

    let events = tick(&mut conn, 2_000);
    assert!(reconcile_tags(&events).is_empty());
    assert_eq!(conn.domains.len(), 2);
    // the cached record kept accruing history: same object, not a rebuild
    assert_eq!(conn.domains[&web].samples.len(), samples_before + 1);
}

#[test]
fn stop_transition_reuses_record_and_emits_stopped_only() {
    let backend = MockBackend::new();
    let vm5 = backend.define_guest("vm5");
    backend.start_guest(vm5);
    let vm7 = backend.define_guest("vm7");
    backend.start_guest(vm7);

    let mut conn = active_connection(&backend);
    let t0_events = tick(&mut conn, 1_000);
    assert_eq!(
        t0_events
            .iter()
            .filter(|e| matches!(e, Event::EntityStarted { .. }))
            .count(),
        2
    );
    let history_before = conn.domains[&vm7].samples.len();
    assert!(history_before > 0);

    backend.stop_guest(vm7);
    let t1_events = tick(&mut conn, 2_000);

    assert_eq!(reconcile_tags(&t1_events), vec!["stopped"]);
    assert!(t1_events.contains(&Event::EntityStopped {
        uuid: vm7,
        kind: EntityKind::Domain
    }));
    // identity preserved: the record still holds its pre-transition history
    let vm7_record = &conn.domains[&vm7];
    assert!(!vm7_record.is_active());
    assert_eq!(vm7_record.samples.len(), history_before);
    assert_eq!(vm7_record.status.status(), DomainState::ShutOff);
}

#[test]
fn restart_transition_emits_started_without_readd() {
    let backend = MockBackend::new();
    let vm = backend.define_guest("vm");
    backend.start_guest(vm);

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);
    backend.stop_guest(vm);
    tick(&mut conn, 2_000);

    backend.start_guest(vm);
    let events = tick(&mut conn, 3_000);
    assert_eq!(reconcile_tags(&events), vec!["started"]);
    assert!(conn.domains[&vm].is_active());
}

#[test]
fn absent_guest_is_removed_exactly_once() {
    let backend = MockBackend::new();
    let vm = backend.define_guest("vm");
    backend.start_guest(vm);

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);
    assert_eq!(conn.domains.len(), 1);

    backend.undefine_guest(vm);
    let t1_events = tick(&mut conn, 2_000);
    let t2_events = tick(&mut conn, 3_000);

    let removed: Vec<_> = t1_events
        .iter()
        .chain(t2_events.iter())
        .filter(|e| matches!(e, Event::EntityRemoved { .. }))
        .collect();
    assert_eq!(
        removed,
        vec![&Event::EntityRemoved {
            uuid: vm,
            kind: EntityKind::Domain
        }]
    );
    assert!(conn.domains.is_empty());
}

#[test]
fn removal_is_emitted_before_additions_in_the_same_cycle() {
    let backend = MockBackend::new();
    let old = backend.define_guest("old");
    backend.start_guest(old);

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);

    backend.undefine_guest(old);
    let fresh = backend.define_guest("fresh");
    backend.start_guest(fresh);
    let events = tick(&mut conn, 2_000);

    assert_eq!(reconcile_tags(&events), vec!["removed", "added", "started"]);
}

#[test]
fn failed_active_listing_keeps_prior_active_set() {
    let backend = MockBackend::new();
    let vm = backend.define_guest("vm");
    backend.start_guest(vm);

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);

    backend.fail_active_listing(true);
    let events = tick(&mut conn, 2_000);
    assert!(reconcile_tags(&events).is_empty());
    assert!(conn.domains[&vm].is_active());

    backend.fail_active_listing(false);
    let events = tick(&mut conn, 3_000);
    assert!(reconcile_tags(&events).is_empty());
}

#[test]
fn failed_inactive_listing_keeps_prior_inactive_set() {
    let backend = MockBackend::new();
    let build = backend.define_guest("build");

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);
    assert_eq!(conn.domains.len(), 1);

    backend.fail_inactive_listing(true);
    let events = tick(&mut conn, 2_000);
    assert!(reconcile_tags(&events).is_empty());
    assert!(conn.domains.contains_key(&build));
}

#[test]
fn vanished_guest_lookup_is_swallowed() {
    let backend = MockBackend::new();
    let ghost = backend.define_guest("ghost");
    backend.start_guest(ghost);
    // still listed by id, but destroyed before any lookup can resolve it
    backend.vanish_guest(ghost);

    let mut conn = active_connection(&backend);
    let events = tick(&mut conn, 1_000);
    assert!(reconcile_tags(&events).is_empty());
    assert!(conn.domains.is_empty());
}

#[test]
fn networks_reconcile_through_their_own_lifecycle() {
    let backend = MockBackend::new();
    let net = backend.define_network("default");

    let mut conn = active_connection(&backend);
    let events = tick(&mut conn, 1_000);
    assert!(events.contains(&Event::EntityAdded {
        uuid: net,
        kind: EntityKind::Network
    }));

    backend.start_network(net);
    let events = tick(&mut conn, 2_000);
    assert!(events.contains(&Event::EntityStarted {
        uuid: net,
        kind: EntityKind::Network
    }));
    assert!(conn.networks[&net].is_active());

    backend.stop_network(net);
    let events = tick(&mut conn, 3_000);
    assert!(events.contains(&Event::EntityStopped {
        uuid: net,
        kind: EntityKind::Network
    }));

    backend.undefine_network(net);
    let events = tick(&mut conn, 4_000);
    assert!(events.contains(&Event::EntityRemoved {
        uuid: net,
        kind: EntityKind::Network
    }));
    assert!(conn.networks.is_empty());
}

#[test]
fn net_devices_track_the_listed_set() {
    use virtwatch::models::NetDeviceInfo;

    let backend = MockBackend::new();
    backend.set_net_devices(vec![
        NetDeviceInfo {
            path: "/sys/class/net/virbr0".into(),
            rx_kb: 10,
            tx_kb: 20,
        },
        NetDeviceInfo {
            path: "/sys/class/net/virbr1".into(),
            rx_kb: 0,
            tx_kb: 0,
        },
    ]);

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);
    assert_eq!(conn.net_devices.len(), 2);
    assert_eq!(conn.net_devices["/sys/class/net/virbr0"].rx_kb, 10);

    backend.set_net_devices(vec![NetDeviceInfo {
        path: "/sys/class/net/virbr0".into(),
        rx_kb: 30,
        tx_kb: 40,
    }]);
    tick(&mut conn, 2_000);
    assert_eq!(conn.net_devices.len(), 1);
    assert_eq!(conn.net_devices["/sys/class/net/virbr0"].tx_kb, 40);
}

#[test]
fn inactive_connection_cycle_is_a_noop() {
    let mut conn = virtwatch::connection::Connection::new("mock:///test", common::HISTORY);
    // never activated
    let events = tick(&mut conn, 1_000);
    assert!(events.is_empty());
    assert!(conn.domains.is_empty());
    assert_eq!(conn.state, ConnState::Disconnected);
}

#[test]
fn close_drops_all_cached_state() {
    let backend = MockBackend::new();
    let vm = backend.define_guest("vm");
    backend.start_guest(vm);

    let mut conn = active_connection(&backend);
    tick(&mut conn, 1_000);
    assert!(!conn.domains.is_empty());
    assert!(!conn.samples.is_empty());

    conn.close();
    assert!(conn.domains.is_empty());
    assert!(conn.networks.is_empty());
    assert!(conn.net_devices.is_empty());
    assert!(conn.samples.is_empty());
    assert_eq!(conn.state, ConnState::Disconnected);

    // closed connections no longer poll
    assert!(tick(&mut conn, 2_000).is_empty());
}
