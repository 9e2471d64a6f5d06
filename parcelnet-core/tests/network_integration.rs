//! Integration tests for nodes exchanging package updates over the network.

use std::sync::Arc;
use std::time::Duration;

use parcelnet_core::config::NetworkConfig;
use parcelnet_core::network::DeliveryStatus;
use parcelnet_core::{
    AnomalyConfig, AnomalyDetector, DeliveryOutcome, DeterministicRng, EventKind, ManualWallClock,
    Network, NodeId, NodeSpec, PackageId, ReceiveOutcome, SnapshotCoordinator,
};

fn three_node_network(wall: &ManualWallClock) -> Network {
    let mut network = Network::new(
        &NetworkConfig::default(),
        Arc::new(wall.clone()),
        DeterministicRng::from_seed(2024),
        1000,
        1000,
    );
    for spec in [
        NodeSpec::new("N1", "Europe", 120),
        NodeSpec::new("N2", "US-East", 80),
        NodeSpec::new("N3", "Asia-Pacific", 150),
    ] {
        assert!(network.register_spec(&spec));
    }
    network
}

#[test]
fn test_update_reaches_peer_as_single_remote_record() {
    let wall = ManualWallClock::starting_at(1_700_000_000_000);
    let mut network = three_node_network(&wall);

    network
        .publish_event(&NodeId::from("N1"), PackageId::from("P1"), EventKind::Departed, "HubA")
        .unwrap();
    wall.advance(Duration::from_millis(200));
    network.deliver_due();

    let history = network.node("N2").unwrap().history("P1");
    assert_eq!(history.len(), 1);
    assert!(history[0].is_remote);
    assert_eq!(history[0].kind, EventKind::Departed);
    assert_eq!(history[0].origin, NodeId::from("N1"));
    assert_eq!(history[0].location, "HubA");
}

#[test]
fn test_broadcast_delivers_one_copy_per_peer() {
    let wall = ManualWallClock::starting_at(0);
    let mut network = three_node_network(&wall);

    let (_, ids) = network
        .publish_event(&NodeId::from("N1"), PackageId::from("P3"), EventKind::InTransit, "HubC")
        .unwrap();
    network.deliver_all();

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(network.stats().delivered, 2);
    assert!(network.node("N1").unwrap().history("P3").iter().all(|record| !record.is_remote));
    for peer in ["N2", "N3"] {
        assert_eq!(network.node(peer).unwrap().history("P3").len(), 1);
    }

    let receivers: Vec<_> = network
        .delivered()
        .iter()
        .filter(|record| record.status == DeliveryStatus::Applied)
        .filter_map(|record| record.receiver.clone())
        .collect();
    assert_eq!(receivers.len(), 2);
    assert!(!receivers.contains(&NodeId::from("N1")));
}

#[test]
fn test_redelivery_of_same_message_is_ignored() {
    let wall = ManualWallClock::starting_at(0);
    let mut network = three_node_network(&wall);
    network
        .publish_event(&NodeId::from("N1"), PackageId::from("P1"), EventKind::Departed, "HubA")
        .unwrap();

    let sent = network.node("N1").unwrap().in_flight()[0].clone();
    let receiver = sent.receiver().unwrap().clone();

    let first = network.deliver(sent.clone());
    let second = network.deliver(sent);

    assert!(matches!(first, DeliveryOutcome::Received(ReceiveOutcome::Applied(_))));
    assert_eq!(second, DeliveryOutcome::Received(ReceiveOutcome::Duplicate));
    assert_eq!(network.node(receiver.as_str()).unwrap().history("P1").len(), 1);
    assert_eq!(network.stats().duplicates, 1);
}

#[test]
fn test_merged_timestamps_precede_later_local_ticks() {
    let wall = ManualWallClock::starting_at(10_000);
    let mut network = three_node_network(&wall);

    network
        .publish_event(&NodeId::from("N1"), PackageId::from("P1"), EventKind::Departed, "HubA")
        .unwrap();
    network.deliver_all();
    let (local, _) = network
        .publish_event(&NodeId::from("N2"), PackageId::from("P1"), EventKind::Arrived, "HubB")
        .unwrap();

    let remote = &network.node("N2").unwrap().history("P1")[0];
    assert!(remote.timestamp < local.timestamp);
    assert!(remote.causal_cmp(&local).is_lt());
}

#[test]
fn test_skewed_sender_produces_drift_at_receiver() {
    let wall = ManualWallClock::starting_at(1_000_000);
    let mut network = three_node_network(&wall);
    network.register_spec(&NodeSpec::new("SKEW", "Africa", 50).with_clock_offset(15_000));
    let mut detector = AnomalyDetector::new(AnomalyConfig::default(), Arc::new(wall.clone()), 100);

    network
        .publish_event(&NodeId::from("SKEW"), PackageId::from("P4"), EventKind::Departed, "HubS")
        .unwrap();
    network.deliver_all();
    wall.advance(Duration::from_secs(12));
    network
        .node_mut("N1")
        .unwrap()
        .record_local_event(PackageId::from("P4"), EventKind::InTransit, "HubN");

    let found = detector.scan(network.nodes());

    assert!(
        found
            .iter()
            .any(|anomaly| anomaly.kind == parcelnet_core::AnomalyKind::ClockDrift
                && anomaly.package_id == PackageId::from("P4"))
    );
}

#[test]
fn test_global_snapshot_sees_pending_broadcast() {
    let wall = ManualWallClock::starting_at(0);
    let mut network = three_node_network(&wall);
    let coordinator = SnapshotCoordinator::new(Arc::new(wall.clone()));

    network
        .publish_event(&NodeId::from("N3"), PackageId::from("P2"), EventKind::Arrived, "HubZ")
        .unwrap();

    let snapshot = coordinator.capture_global(network.nodes_mut());

    assert_eq!(snapshot.total_in_flight(), 2);
    assert_eq!(snapshot.per_node[&NodeId::from("N3")].package_count, 1);
    assert_eq!(snapshot.per_node[&NodeId::from("N1")].package_count, 0);
}
