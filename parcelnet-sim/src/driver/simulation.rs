//! Discrete-time driver generating package events across the network.

use std::sync::Arc;
use std::time::Duration;

use parcelnet_core::clock::MAX_TIME_ADVANCE;
use parcelnet_core::network::RegionSummary;
use parcelnet_core::{
    Anomaly, AnomalyDetector, BoundedLog, ConfigError, DeterministicRng, EventKind, EventRecord,
    GlobalSnapshot, HierarchicalSnapshot, ManualWallClock, Network, NetworkError, NetworkStats,
    NodeId, PackageId, ParcelnetConfig, RegionDriftSummary, RegionSnapshot, SnapshotCoordinator,
    SnapshotDiff, WallClock,
};
use serde::Serialize;

use super::state::{SimulationMetrics, SimulationStatus, TimelineEntry};

/// Virtual wall time at which deterministic simulations start (2023-11-14).
pub const DETERMINISTIC_EPOCH_MS: u64 = 1_700_000_000_000;

/// Errors that can occur while driving a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// Topology has no nodes
    #[error("Simulation requires at least one node")]
    NoNodes,

    /// Deterministic seed required but not provided
    #[error("No deterministic seed provided")]
    NoDeterministicSeed,

    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Routing failed
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Virtual time cannot move this far in one call
    #[error("Cannot advance virtual time by {requested:?}: limit is 24 hours")]
    TimeAdvance {
        /// Duration asked for
        requested: Duration,
    },

    /// Driver actor is no longer running
    #[error("Simulation driver has shut down")]
    DriverShutdown,
}

/// Result of one simulation step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Simulated time after the step
    pub sim_time: u64,
    /// Event recorded by this step, if any
    pub generated: Option<EventRecord>,
    /// Anomalies found by this step's scan
    pub anomalies: Vec<Anomaly>,
}

/// A synchronous global snapshot with changes since the previous one.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedSnapshot {
    /// The aggregated snapshot
    pub snapshot: GlobalSnapshot,
    /// Package changes since the previous capture, absent on the first
    pub changes: Option<SnapshotDiff>,
}

/// Summary of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Simulated time counter
    pub sim_time: u64,
    /// Driver status when the report was taken
    pub status: SimulationStatus,
    /// Collected metrics
    pub metrics: SimulationMetrics,
    /// Network counters
    pub network: NetworkStats,
    /// Per-region aggregates
    pub regions: Vec<RegionSummary>,
    /// Drifted arrivals per receiving region
    pub region_drifts: Vec<RegionDriftSummary>,
    /// Most recent visible anomalies, newest first
    pub recent_anomalies: Vec<Anomaly>,
    /// Deliveries still queued
    pub pending_deliveries: usize,
}

impl SimulationReport {
    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Simulation Report (seed: {})\n", self.seed));
        summary.push_str(&format!("Status: {:?}\n", self.status));
        summary.push_str(&format!("Simulated time: {}\n", self.sim_time));
        summary.push_str(&format!(
            "Steps: {}  Events: {}  Messages: {}\n",
            self.metrics.steps, self.metrics.events_generated, self.metrics.messages_sent
        ));
        summary.push_str(&format!(
            "Deliveries: {} delivered, {} duplicate, {} rejected, {} unroutable, {} stale, {} pending\n",
            self.network.delivered,
            self.network.duplicates,
            self.network.rejected,
            self.network.dropped_unroutable,
            self.network.dropped_stale,
            self.pending_deliveries
        ));

        summary.push_str("\nRegions:\n");
        for region in &self.regions {
            summary.push_str(&format!(
                "  {}: {} nodes, {} packages, {} in flight\n",
                region.region, region.node_count, region.package_count, region.in_flight_count
            ));
        }

        if !self.region_drifts.is_empty() {
            summary.push_str(&format!("\nArrival drift ({} deliveries):\n", self.network.arrival_drifts));
            for drift in &self.region_drifts {
                summary.push_str(&format!(
                    "  {}: {} arrivals, max {}ms\n",
                    drift.region, drift.arrival_drifts, drift.max_drift_ms
                ));
            }
        }

        if !self.metrics.anomalies_by_kind.is_empty() {
            summary.push_str("\nAnomalies detected:\n");
            for (kind, count) in &self.metrics.anomalies_by_kind {
                summary.push_str(&format!("  {kind}: {count}\n"));
            }
        }

        if !self.recent_anomalies.is_empty() {
            summary.push_str("\nRecent anomalies:\n");
            for anomaly in &self.recent_anomalies {
                summary.push_str(&format!(
                    "  [{}] {}: {}\n",
                    anomaly.severity, anomaly.kind, anomaly.description
                ));
            }
        }

        summary
    }
}

/// Discrete-time stepper over a network of tracking nodes.
///
/// Each step may record one random local event and broadcast it, rebuilds
/// the combined timeline, scans for anomalies and advances simulated time.
/// Deliveries are pumped by [`tick`](Self::tick) independently of the
/// running state, so pausing stops event generation but not message flow.
#[derive(Debug)]
pub struct SimulationDriver {
    config: ParcelnetConfig,
    network: Network,
    detector: AnomalyDetector,
    coordinator: SnapshotCoordinator,
    rng: DeterministicRng,
    visible_anomalies: BoundedLog<Anomaly>,
    timeline: Vec<TimelineEntry>,
    sim_time: u64,
    status: SimulationStatus,
    metrics: SimulationMetrics,
    manual_clock: Option<ManualWallClock>,
    last_snapshot: Option<GlobalSnapshot>,
    collected_snapshot: Option<GlobalSnapshot>,
}

impl SimulationDriver {
    /// Creates a driver reading time from `wall`.
    ///
    /// Uses the configured seed, or a random one when none is set.
    ///
    /// # Errors
    /// - `SimulationError::Config` - Configuration failed validation
    /// - `SimulationError::NoNodes` - Topology is empty
    pub fn new(config: ParcelnetConfig, wall: Arc<dyn WallClock>) -> Result<Self, SimulationError> {
        let seed = config
            .simulation
            .deterministic_seed
            .unwrap_or_else(rand::random);
        Self::build(config, wall, seed, None)
    }

    /// Creates a driver on a virtual clock that moves one step period per tick.
    ///
    /// # Errors
    /// - `SimulationError::NoDeterministicSeed` - Configuration has no seed
    /// - `SimulationError::Config` - Configuration failed validation
    /// - `SimulationError::NoNodes` - Topology is empty
    pub fn deterministic(config: ParcelnetConfig) -> Result<Self, SimulationError> {
        let seed = config
            .simulation
            .deterministic_seed
            .ok_or(SimulationError::NoDeterministicSeed)?;
        let clock = ManualWallClock::starting_at(DETERMINISTIC_EPOCH_MS);
        Self::build(config, Arc::new(clock.clone()), seed, Some(clock))
    }

    fn build(
        config: ParcelnetConfig,
        wall: Arc<dyn WallClock>,
        seed: u64,
        manual_clock: Option<ManualWallClock>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        if config.nodes.is_empty() {
            return Err(SimulationError::NoNodes);
        }

        // Separate streams so event generation does not shift delivery jitter
        let mut rng = DeterministicRng::from_seed(seed);
        let network_rng = rng.fork();

        let mut network = Network::new(
            &config.network,
            Arc::clone(&wall),
            network_rng,
            config.retention.event_log,
            config.retention.delivery_log,
        );
        for spec in &config.nodes {
            network.register_spec(spec);
        }

        let detector = AnomalyDetector::new(
            config.anomaly.clone(),
            Arc::clone(&wall),
            config.retention.anomaly_history,
        );

        tracing::debug!(seed, nodes = network.len(), "Created simulation driver");

        Ok(Self {
            visible_anomalies: BoundedLog::with_capacity(config.retention.visible_anomalies),
            coordinator: SnapshotCoordinator::new(wall),
            config,
            network,
            detector,
            rng,
            timeline: Vec::new(),
            sim_time: 0,
            status: SimulationStatus::Idle,
            metrics: SimulationMetrics::new(),
            manual_clock,
            last_snapshot: None,
            collected_snapshot: None,
        })
    }

    /// Returns the seed used for reproduction.
    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Returns the configuration the driver was built with.
    pub fn config(&self) -> &ParcelnetConfig {
        &self.config
    }

    /// Returns interval between steps.
    pub fn step_period(&self) -> Duration {
        self.config.simulation.step_period
    }

    /// Returns current lifecycle state.
    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    /// Returns simulated time counter.
    pub fn sim_time(&self) -> u64 {
        self.sim_time
    }

    /// Returns collected metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Returns the underlying network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Returns the underlying network for direct manipulation.
    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Returns the detector and its accumulator.
    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Returns the combined timeline built by the last step.
    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    /// Merges every node's history of one package in hybrid clock order.
    pub fn package_timeline(&self, package_id: &str) -> Vec<EventRecord> {
        self.network.package_timeline(package_id)
    }

    /// Returns up to `limit` visible anomalies, newest first.
    pub fn recent_anomalies(&self, limit: usize) -> Vec<Anomaly> {
        self.visible_anomalies
            .iter_newest_first()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Starts periodic stepping.
    pub fn start(&mut self) {
        if self.status != SimulationStatus::Running {
            tracing::info!(seed = self.seed(), "Simulation started");
        }
        self.status = SimulationStatus::Running;
    }

    /// Suspends periodic stepping. Deliveries keep flowing.
    pub fn pause(&mut self) {
        if self.status == SimulationStatus::Running {
            tracing::info!(sim_time = self.sim_time, "Simulation paused");
            self.status = SimulationStatus::Paused;
        }
    }

    /// Clears node state and anomaly accumulators and stops stepping.
    ///
    /// Deliveries queued before the reset are dropped when they come due.
    pub fn reset(&mut self) {
        self.network.reset();
        self.detector.clear();
        self.visible_anomalies.clear();
        self.timeline.clear();
        self.sim_time = 0;
        self.metrics = SimulationMetrics::new();
        self.status = SimulationStatus::Idle;
        self.last_snapshot = None;
        self.collected_snapshot = None;
        self.coordinator = SnapshotCoordinator::new(Arc::clone(self.network.wall()));
        tracing::info!("Simulation reset");
    }

    /// Advances virtual time by one period, delivers due messages and steps
    /// when running.
    ///
    /// On a real-time driver only deliveries and the step happen; wall time
    /// moves on its own.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Delivery queue overflowed while stepping
    /// - `SimulationError::TimeAdvance` - Step period exceeds 24 hours
    pub fn tick(&mut self) -> Result<Option<StepOutcome>, SimulationError> {
        self.advance_time(self.config.simulation.step_period)?;
        self.network.deliver_due();

        if let Some(snapshot) = self.coordinator.collect(&mut self.network) {
            self.collected_snapshot = Some(snapshot);
        }

        match self.status {
            SimulationStatus::Running => self.step().map(Some),
            SimulationStatus::Idle | SimulationStatus::Paused => Ok(None),
        }
    }

    /// Executes one step regardless of the running state.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Delivery queue overflowed during broadcast
    pub fn step(&mut self) -> Result<StepOutcome, SimulationError> {
        let generated = if self.rng.chance(self.config.simulation.event_probability) {
            self.generate_event()?
        } else {
            None
        };

        self.rebuild_timeline();
        let anomalies = self.scan();

        self.sim_time += 1;
        self.metrics.record_step();

        Ok(StepOutcome {
            sim_time: self.sim_time,
            generated,
            anomalies,
        })
    }

    /// Starts the driver and ticks `steps` times.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Delivery queue overflowed
    pub fn run_steps(&mut self, steps: u64) -> Result<SimulationReport, SimulationError> {
        self.start();
        for _ in 0..steps {
            self.tick()?;
        }
        Ok(self.report())
    }

    /// Records a local event on `node_id` and broadcasts it.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Unknown node or delivery queue overflow
    pub fn publish(
        &mut self,
        node_id: &NodeId,
        package_id: PackageId,
        kind: EventKind,
        location: impl Into<String>,
    ) -> Result<EventRecord, SimulationError> {
        let (record, ids) = self
            .network
            .publish_event(node_id, package_id, kind, location)?;
        self.metrics.record_event(ids.len());
        Ok(record)
    }

    /// Records a local event on `node_id` without telling other nodes.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Unknown node
    pub fn record_local(
        &mut self,
        node_id: &NodeId,
        package_id: PackageId,
        kind: EventKind,
        location: impl Into<String>,
    ) -> Result<EventRecord, SimulationError> {
        let node = self
            .network
            .node_mut(node_id.as_str())
            .ok_or_else(|| NetworkError::UnknownNode {
                node_id: node_id.clone(),
            })?;
        let record = node.record_local_event(package_id, kind, location);
        self.metrics.record_event(0);
        Ok(record)
    }

    /// Moves virtual time forward without stepping.
    ///
    /// Returns false on a real-time driver, where time cannot be moved.
    ///
    /// # Errors
    /// - `SimulationError::TimeAdvance` - Duration exceeds 24 hours; time is
    ///   left where it was
    pub fn advance_time(&mut self, duration: Duration) -> Result<bool, SimulationError> {
        if duration > MAX_TIME_ADVANCE {
            return Err(SimulationError::TimeAdvance {
                requested: duration,
            });
        }
        match &self.manual_clock {
            Some(clock) => {
                clock.advance(duration);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delivers every queued message regardless of due time.
    pub fn flush_deliveries(&mut self) -> usize {
        self.network.deliver_all()
    }

    /// Scans all nodes and merges findings into the visible accumulator.
    pub fn scan(&mut self) -> Vec<Anomaly> {
        let anomalies = self.detector.scan(self.network.nodes());
        self.metrics.record_anomalies(&anomalies);
        self.visible_anomalies.extend(anomalies.iter().cloned());
        anomalies
    }

    /// Captures a synchronous global snapshot and diffs it against the last one.
    pub fn capture_snapshot(&mut self) -> CapturedSnapshot {
        let snapshot = self.coordinator.capture_global(self.network.nodes_mut());
        let changes = self
            .last_snapshot
            .as_ref()
            .map(|previous| snapshot.diff(previous));
        self.last_snapshot = Some(snapshot.clone());
        CapturedSnapshot { snapshot, changes }
    }

    /// Snapshots the nodes of one region. `None` when the region has no node.
    pub fn capture_region_snapshot(&mut self, region: &str) -> Option<RegionSnapshot> {
        self.coordinator
            .capture_region(region, self.network.nodes_mut())
    }

    /// Snapshots every region and rolls the regions up.
    pub fn capture_hierarchical_snapshot(&mut self) -> HierarchicalSnapshot {
        self.coordinator
            .capture_hierarchical(self.network.nodes_mut())
    }

    /// Starts a message-driven snapshot from `initiator`.
    ///
    /// The result becomes available through
    /// [`take_collected_snapshot`](Self::take_collected_snapshot) once every
    /// node answered and a later tick collected the responses.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Unknown initiator or delivery queue overflow
    pub fn request_snapshot(&mut self, initiator: &NodeId) -> Result<usize, SimulationError> {
        self.collected_snapshot = None;
        Ok(self
            .coordinator
            .request_via_network(&mut self.network, initiator)?)
    }

    /// Takes the result of the last completed message-driven snapshot.
    pub fn take_collected_snapshot(&mut self) -> Option<GlobalSnapshot> {
        self.collected_snapshot.take()
    }

    /// Builds a report of the run so far.
    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            seed: self.seed(),
            sim_time: self.sim_time,
            status: self.status,
            metrics: self.metrics.clone(),
            network: self.network.stats(),
            regions: self.network.region_summaries(),
            region_drifts: self.network.region_drift_summaries(),
            recent_anomalies: self.recent_anomalies(self.config.retention.visible_anomalies),
            pending_deliveries: self.network.pending_deliveries(),
        }
    }

    fn generate_event(&mut self) -> Result<Option<EventRecord>, SimulationError> {
        let node_ids = self.network.node_ids();
        let Some(node_id) = self.rng.pick(&node_ids).cloned() else {
            return Ok(None);
        };
        let Some(package_id) = self.rng.pick(&self.config.simulation.package_ids).cloned() else {
            return Ok(None);
        };
        let Some(kind) = self.rng.pick(&self.config.simulation.event_kinds).copied() else {
            return Ok(None);
        };

        let hub = self.rng.hub_number(self.config.simulation.hubs_per_region);
        let region = self
            .network
            .node(node_id.as_str())
            .map(|node| node.region().to_string())
            .unwrap_or_default();
        let location = format!("{region}-Hub-{hub}");

        let record = self.publish(&node_id, package_id, kind, location)?;
        tracing::trace!(
            node = %node_id,
            package = %record.package_id,
            kind = %record.kind,
            "Generated event"
        );
        Ok(Some(record))
    }

    fn rebuild_timeline(&mut self) {
        let window = self.config.simulation.timeline_window;
        let mut timeline: Vec<TimelineEntry> = self
            .network
            .nodes()
            .flat_map(|node| {
                node.event_log().recent(window).map(|entry| TimelineEntry {
                    node_id: node.id().clone(),
                    entry: entry.clone(),
                })
            })
            .collect();
        timeline.sort_by(|a, b| {
            a.entry
                .timestamp()
                .cmp(&b.entry.timestamp())
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        self.timeline = timeline;
    }
}

#[cfg(test)]
mod tests {
    use parcelnet_core::LogEntry;

    use super::*;

    fn driver() -> SimulationDriver {
        SimulationDriver::deterministic(ParcelnetConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_deterministic_requires_seed() {
        let mut config = ParcelnetConfig::for_testing();
        config.simulation.deterministic_seed = None;

        let result = SimulationDriver::deterministic(config);

        assert!(matches!(result, Err(SimulationError::NoDeterministicSeed)));
    }

    #[test]
    fn test_empty_topology_rejected() {
        let mut config = ParcelnetConfig::for_testing();
        config.nodes.clear();

        let result = SimulationDriver::deterministic(config);

        assert!(matches!(result, Err(SimulationError::NoNodes)));
    }

    #[test]
    fn test_idle_driver_does_not_step() {
        let mut driver = driver();

        assert!(driver.tick().unwrap().is_none());
        assert_eq!(driver.sim_time(), 0);
        assert_eq!(driver.status(), SimulationStatus::Idle);
    }

    #[test]
    fn test_step_generates_event_with_hub_location() {
        let mut driver = driver();

        let outcome = driver.step().unwrap();

        let record = outcome.generated.unwrap();
        assert_eq!(outcome.sim_time, 1);
        assert!(record.location.contains("-Hub-"));
        assert!(driver.config().simulation.package_ids.contains(&record.package_id));
        assert_eq!(driver.network().pending_deliveries(), 2);
        assert_eq!(driver.metrics().messages_sent, 2);
    }

    #[test]
    fn test_timeline_is_in_clock_order() {
        let mut driver = driver();
        driver.run_steps(10).unwrap();

        let timeline = driver.timeline();
        assert!(!timeline.is_empty());
        assert!(
            timeline
                .windows(2)
                .all(|pair| pair[0].entry.timestamp() <= pair[1].entry.timestamp())
        );
        assert!(
            timeline
                .iter()
                .any(|item| matches!(item.entry, LogEntry::Receipt(_)))
        );
    }

    #[test]
    fn test_pause_stops_steps_but_not_deliveries() {
        let mut driver = driver();
        driver.start();
        driver.tick().unwrap();
        let steps = driver.metrics().steps;
        assert!(driver.network().pending_deliveries() > 0);

        driver.pause();
        driver.tick().unwrap();

        assert_eq!(driver.status(), SimulationStatus::Paused);
        assert_eq!(driver.metrics().steps, steps);
        assert_eq!(driver.network().pending_deliveries(), 0);
    }

    #[test]
    fn test_same_seed_same_run() {
        let mut first = driver();
        let mut second = driver();

        first.run_steps(25).unwrap();
        second.run_steps(25).unwrap();

        assert_eq!(first.metrics(), second.metrics());
        assert_eq!(first.network().stats(), second.network().stats());
        assert_eq!(first.package_timeline("P001"), second.package_timeline("P001"));
    }

    #[test]
    fn test_capture_snapshot_reports_changes() {
        let mut driver = driver();

        let first = driver.capture_snapshot();
        assert!(first.changes.is_none());

        driver.run_steps(3).unwrap();
        let second = driver.capture_snapshot();

        let changes = second.changes.unwrap();
        assert!(!changes.added.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_message_driven_snapshot_collected_on_tick() {
        let mut driver = driver();
        driver.run_steps(3).unwrap();
        driver.pause();

        let sent = driver.request_snapshot(&NodeId::from("EU-1")).unwrap();
        assert_eq!(sent, 2);
        assert!(driver.take_collected_snapshot().is_none());

        // Request and response each need one period of latency plus jitter
        for _ in 0..3 {
            driver.tick().unwrap();
        }

        let snapshot = driver.take_collected_snapshot().unwrap();
        assert_eq!(snapshot.per_node.len(), 3);
    }
}
