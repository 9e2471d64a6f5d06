//! End-to-end runs of the simulation driver over canned topologies.

use std::time::Duration;

use parcelnet_core::{AnomalyKind, EventKind, LogEntry, NodeId, PackageId, WallClock};
use parcelnet_sim::scenarios::{
    FORCED_DRIFT_PACKAGE, FORCED_ORDER_PACKAGE, continental_config, three_region_config,
};
use parcelnet_sim::{ForcedAnomalyScenario, SimulationDriver, SimulationError, SimulationStatus};
use proptest::prelude::*;

fn driver(seed: u64) -> SimulationDriver {
    SimulationDriver::deterministic(three_region_config(seed))
        .unwrap_or_else(|e| panic!("driver creation failed: {e}"))
}

#[test]
fn test_published_update_arrives_after_latency() {
    let mut driver = driver(7);
    let origin = NodeId::from("EU-1");

    driver
        .publish(&origin, PackageId::from("P1"), EventKind::Departed, "Europe-Hub-1")
        .unwrap();
    assert!(driver.network().node("US-1").unwrap().history("P1").is_empty());

    // Idle ticks still pump deliveries; one period covers latency plus jitter
    driver.tick().unwrap();

    for peer in ["US-1", "APAC-1"] {
        let history = driver.network().node(peer).unwrap().history("P1");
        assert_eq!(history.len(), 1);
        assert!(history[0].is_remote);
        assert_eq!(history[0].origin, origin);
    }
    assert_eq!(driver.network().stats().delivered, 2);
    assert!(driver.network().node("EU-1").unwrap().in_flight().is_empty());
}

#[test]
fn test_broadcast_reaches_every_peer_once() {
    let mut driver = driver(7);

    driver
        .publish(&NodeId::from("US-1"), PackageId::from("P3"), EventKind::InTransit, "US-East-Hub-2")
        .unwrap();
    assert_eq!(driver.network().pending_deliveries(), 2);
    driver.flush_deliveries();

    let timeline = driver.package_timeline("P3");
    assert_eq!(timeline.len(), 3);
    assert_eq!(timeline.iter().filter(|record| !record.is_remote).count(), 1);
    assert!(timeline.windows(2).all(|pair| pair[0].causal_cmp(&pair[1]).is_le()));
    assert_eq!(driver.metrics().messages_sent, 2);
}

#[test]
fn test_reset_clears_state_and_drops_queued_messages() {
    let mut driver = driver(11);
    driver.run_steps(5).unwrap();
    assert!(driver.network().pending_deliveries() > 0);
    let queued = driver.network().pending_deliveries() as u64;

    driver.reset();

    assert_eq!(driver.status(), SimulationStatus::Idle);
    assert_eq!(driver.sim_time(), 0);
    assert!(driver.detector().is_empty());
    assert!(driver.recent_anomalies(10).is_empty());
    assert!(driver.timeline().is_empty());
    for node in driver.network().nodes() {
        assert!(node.packages().is_empty());
        assert!(node.in_flight().is_empty());
        assert!(node.event_log().is_empty());
    }

    driver.tick().unwrap();

    assert_eq!(driver.network().stats().dropped_stale, queued);
    assert_eq!(driver.network().stats().delivered, 0);
    assert!(driver.network().nodes().all(|node| node.packages().is_empty()));
}

#[test]
fn test_running_driver_logs_receipts_and_events() {
    let mut driver = driver(3);

    let report = driver.run_steps(20).unwrap();

    assert_eq!(report.metrics.steps, 20);
    assert_eq!(report.sim_time, 20);
    assert_eq!(report.metrics.events_generated, 20);
    assert_eq!(report.metrics.messages_sent, 40);
    assert_eq!(report.regions.len(), 3);
    assert!(driver.timeline().iter().any(|item| matches!(item.entry, LogEntry::Event(_))));
    assert!(driver.timeline().iter().any(|item| matches!(item.entry, LogEntry::Receipt(_))));
    assert!(report.summary().contains("Simulation Report (seed: 3)"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "running");
    assert_eq!(json["metrics"]["steps"], 20);
}

#[test]
fn test_forced_scenario_raises_both_anomaly_kinds() {
    let outcome = ForcedAnomalyScenario::default().run().unwrap();

    let ordering: Vec<_> = outcome
        .forced
        .iter()
        .filter(|anomaly| anomaly.kind == AnomalyKind::TemporalInconsistency)
        .collect();
    assert_eq!(ordering.len(), 1);
    assert_eq!(ordering[0].package_id.as_str(), FORCED_ORDER_PACKAGE);
    assert_eq!(
        ordering[0].description,
        "Package FORCE-ORDER-001 arrived at Europe before departing from US-East"
    );

    let drift: Vec<_> = outcome
        .forced
        .iter()
        .filter(|anomaly| anomaly.kind == AnomalyKind::ClockDrift)
        .collect();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].package_id.as_str(), FORCED_DRIFT_PACKAGE);
    assert!(drift[0].events.0.is_remote);
    assert!(!drift[0].events.1.is_remote);

    // Every copy of the skewed node's reports arrives drifted
    assert!(outcome.report.network.arrival_drifts >= 3);
    let europe = outcome
        .report
        .region_drifts
        .iter()
        .find(|drift| drift.region == "Europe")
        .unwrap();
    assert!(europe.max_drift_ms > 10_000);
    assert!(outcome.report.summary().contains("Arrival drift"));

    assert_eq!(outcome.snapshot.per_node.len(), 4);
    assert!(outcome.snapshot.latest.contains_key(&PackageId::from(FORCED_ORDER_PACKAGE)));
    assert!(outcome.report.metrics.anomalies_by_kind.contains_key("CLOCK_DRIFT"));
}

#[test]
fn test_continental_run_spans_seven_regions() {
    let mut driver = SimulationDriver::deterministic(continental_config(2, 5)).unwrap();

    let report = driver.run_steps(15).unwrap();

    assert_eq!(driver.network().len(), 14);
    assert_eq!(report.regions.len(), 7);
    assert!(report.regions.iter().all(|region| region.node_count == 2));
    assert_eq!(report.metrics.messages_sent, report.metrics.events_generated * 13);

    assert!(driver.advance_time(Duration::from_secs(1)).unwrap());
    driver.flush_deliveries();
    let captured = driver.capture_snapshot();
    assert_eq!(captured.snapshot.per_node.len(), 14);
    assert_eq!(captured.snapshot.total_in_flight(), 0);
}

#[test]
fn test_oversized_time_advance_is_refused() {
    let mut driver = driver(5);
    let before = driver.network().wall().now_ms();

    let result = driver.advance_time(Duration::from_secs(90_000));

    assert!(matches!(result, Err(SimulationError::TimeAdvance { .. })));
    assert_eq!(driver.network().wall().now_ms(), before);
}

#[test]
fn test_driver_rejects_step_period_over_a_day() {
    let mut config = three_region_config(5);
    config.simulation.step_period = Duration::from_secs(90_000);

    let result = SimulationDriver::deterministic(config);

    assert!(matches!(result, Err(SimulationError::Config(_))));
}

#[test]
fn test_region_and_hierarchical_captures_after_run() {
    let mut driver = driver(9);
    driver.run_steps(12).unwrap();
    driver.flush_deliveries();

    let europe = driver.capture_region_snapshot("Europe").unwrap();
    assert_eq!(europe.per_node.len(), 1);
    assert!(driver.capture_region_snapshot("Antarctica").is_none());

    let rolled_up = driver.capture_hierarchical_snapshot();
    let global = driver.capture_snapshot().snapshot;
    assert_eq!(rolled_up.regions.len(), 3);
    let stamps = |latest: &std::collections::BTreeMap<PackageId, parcelnet_core::EventRecord>| {
        latest
            .iter()
            .map(|(package, record)| (package.clone(), record.timestamp, record.origin.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(stamps(&rolled_up.latest), stamps(&global.latest));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn same_seed_reproduces_run(seed in any::<u64>(), steps in 1u64..25) {
        let mut first = driver(seed);
        let mut second = driver(seed);

        let a = first.run_steps(steps).unwrap();
        let b = second.run_steps(steps).unwrap();

        prop_assert_eq!(a.metrics, b.metrics);
        prop_assert_eq!(a.network, b.network);
        prop_assert_eq!(a.pending_deliveries, b.pending_deliveries);
        for package in ["P001", "P002", "P003", "P004", "P005"] {
            prop_assert_eq!(first.package_timeline(package), second.package_timeline(package));
        }
    }
}
