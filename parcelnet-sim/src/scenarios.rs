//! Pre-built topologies and scenarios for the tracking simulation.

use std::time::Duration;

use parcelnet_core::config::default_topology;
use parcelnet_core::{
    Anomaly, EventKind, GlobalSnapshot, NodeId, NodeSpec, PackageId, ParcelnetConfig,
};

use crate::driver::{SimulationDriver, SimulationError, SimulationReport};

/// Continents with the wall-clock skew their nodes start from.
pub const CONTINENTS: [(&str, &str, i64); 7] = [
    ("NA", "North America", 0),
    ("EU", "Europe", 5_000),
    ("AS", "Asia", 10_000),
    ("AF", "Africa", 15_000),
    ("SA", "South America", 20_000),
    ("AU", "Oceania", 25_000),
    ("AN", "Antarctica", 30_000),
];

/// Package whose arrival is reported before another node's departure.
pub const FORCED_ORDER_PACKAGE: &str = "FORCE-ORDER-001";

/// Package recorded by a skewed node and then far later by a peer.
pub const FORCED_DRIFT_PACKAGE: &str = "FORCE-DRIFT-001";

/// Deterministic configuration over the three-region topology.
pub fn three_region_config(seed: u64) -> ParcelnetConfig {
    let mut config = ParcelnetConfig::for_testing();
    config.simulation.deterministic_seed = Some(seed);
    config.nodes = default_topology();
    config
}

/// Nodes spread over seven continents.
///
/// Node `i` (from 1) of a continent is named `{code}-N{i}` and skewed by
/// the continent offset plus `10 * i` milliseconds.
pub fn continental_topology(nodes_per_region: usize, latency_ms: u64) -> Vec<NodeSpec> {
    CONTINENTS
        .iter()
        .flat_map(|(code, name, offset)| {
            (1..=nodes_per_region).map(move |i| {
                let skew = offset + 10 * i64::try_from(i).unwrap_or(i64::MAX / 20);
                NodeSpec::new(format!("{code}-N{i}"), *name, latency_ms).with_clock_offset(skew)
            })
        })
        .collect()
}

/// Deterministic configuration over the continental topology.
pub fn continental_config(nodes_per_region: usize, seed: u64) -> ParcelnetConfig {
    let mut config = ParcelnetConfig::for_testing();
    config.simulation.deterministic_seed = Some(seed);
    config.nodes = continental_topology(nodes_per_region, config.network.default_latency_ms);
    config
}

/// Run that injects one temporal inconsistency and one clock drift on top of
/// random traffic.
#[derive(Debug, Clone)]
pub struct ForcedAnomalyScenario {
    /// Seed of the deterministic driver
    pub seed: u64,
    /// Random steps before the injection
    pub warmup_steps: u64,
    /// Random steps after the injection
    pub cooldown_steps: u64,
    /// Wall-clock skew of the extra node
    pub skew_ms: i64,
    /// Virtual time between the skewed report and the peer's next record.
    /// Must exceed the drift threshold and stay below `skew_ms`.
    pub drift_gap: Duration,
}

impl Default for ForcedAnomalyScenario {
    fn default() -> Self {
        Self {
            seed: 42,
            warmup_steps: 10,
            cooldown_steps: 5,
            skew_ms: 15_000,
            drift_gap: Duration::from_secs(12),
        }
    }
}

/// Result of a scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    /// Report taken at the end of the run
    pub report: SimulationReport,
    /// Anomalies raised for the injected packages
    pub forced: Vec<Anomaly>,
    /// Global snapshot taken at the end of the run
    pub snapshot: GlobalSnapshot,
}

impl ForcedAnomalyScenario {
    /// Id of the skewed node added to the three-region topology.
    pub const SKEWED_NODE: &'static str = "AF-1";

    /// Configuration with the skewed node appended.
    pub fn config(&self) -> ParcelnetConfig {
        let mut config = three_region_config(self.seed);
        config
            .nodes
            .push(NodeSpec::new(Self::SKEWED_NODE, "Africa", 100).with_clock_offset(self.skew_ms));
        config
    }

    /// Runs warmup, injection and cooldown.
    ///
    /// # Errors
    /// - `SimulationError::Config` - Scenario produced an invalid configuration
    /// - `SimulationError::Network` - Delivery queue overflowed
    /// - `SimulationError::TimeAdvance` - `drift_gap` exceeds 24 hours
    pub fn run(&self) -> Result<ScenarioOutcome, SimulationError> {
        let mut driver = SimulationDriver::deterministic(self.config())?;
        driver.run_steps(self.warmup_steps)?;
        driver.pause();
        driver.flush_deliveries();

        let europe = NodeId::from("EU-1");
        let us_east = NodeId::from("US-1");
        let skewed = NodeId::from(Self::SKEWED_NODE);

        // Arrival broadcast by one node, departure recorded afterwards by another
        driver.publish(&europe, PackageId::from(FORCED_ORDER_PACKAGE), EventKind::Arrived, "Europe-Hub-1")?;
        driver.flush_deliveries();
        driver.record_local(&us_east, PackageId::from(FORCED_ORDER_PACKAGE), EventKind::Departed, "US-East-Hub-1")?;

        // Skewed report pins the peer's logical clock ahead of its wall time
        driver.publish(&skewed, PackageId::from(FORCED_DRIFT_PACKAGE), EventKind::Departed, "Africa-Hub-1")?;
        driver.flush_deliveries();
        driver.advance_time(self.drift_gap)?;
        driver.record_local(&europe, PackageId::from(FORCED_DRIFT_PACKAGE), EventKind::InTransit, "Europe-Hub-2")?;

        let forced: Vec<Anomaly> = driver
            .scan()
            .into_iter()
            .filter(|anomaly| {
                anomaly.package_id.as_str() == FORCED_ORDER_PACKAGE
                    || anomaly.package_id.as_str() == FORCED_DRIFT_PACKAGE
            })
            .collect();
        tracing::info!(forced = forced.len(), "Injected forced anomalies");

        driver.run_steps(self.cooldown_steps)?;
        let snapshot = driver.capture_snapshot().snapshot;

        Ok(ScenarioOutcome {
            report: driver.report(),
            forced,
            snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continental_topology_offsets() {
        let nodes = continental_topology(2, 100);

        assert_eq!(nodes.len(), 14);
        assert_eq!(nodes[0].id, "NA-N1");
        assert_eq!(nodes[0].clock_offset_ms, 10);
        assert_eq!(nodes[3].id, "EU-N2");
        assert_eq!(nodes[3].region, "Europe");
        assert_eq!(nodes[3].clock_offset_ms, 5_020);
        assert_eq!(nodes[13].id, "AN-N2");
        assert_eq!(nodes[13].clock_offset_ms, 30_020);
    }

    #[test]
    fn test_configs_validate() {
        assert_eq!(three_region_config(1).validate(), Ok(()));
        assert_eq!(continental_config(3, 1).validate(), Ok(()));
        assert_eq!(ForcedAnomalyScenario::default().config().nodes.len(), 4);
    }
}
