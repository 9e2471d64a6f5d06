//! Centralized configuration for Parcelnet.
//!
//! All tunable parameters of the tracking network and its simulation are
//! defined here instead of being scattered through the codebase.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use crate::clock::MAX_TIME_ADVANCE;
use crate::model::{EventKind, PackageId};

/// Errors from configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidField {
        /// Dotted path of the offending field
        field: &'static str,
        /// Why the value was refused
        reason: String,
    },

    /// Two topology entries share an id
    #[error("Duplicate node id in topology: {id}")]
    DuplicateNode {
        /// Repeated id
        id: String,
    },
}

/// Central configuration for all Parcelnet components.
#[derive(Debug, Clone, Default)]
pub struct ParcelnetConfig {
    pub network: NetworkConfig,
    pub simulation: SimulationConfig,
    pub retention: RetentionConfig,
    pub anomaly: AnomalyConfig,
    /// Nodes registered when a simulation starts
    pub nodes: Vec<NodeSpec>,
}

/// Message delivery configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base latency for nodes created without an explicit value
    pub default_latency_ms: u64,
    /// Upper bound of the uniform jitter added to every delivery
    pub jitter_max_ms: u64,
    /// Maximum number of queued deliveries
    pub max_pending_deliveries: usize,
    /// Gap between a message's send stamp and the receiver's wall clock
    /// above which the arrival is logged as drifted
    pub arrival_drift_threshold_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_latency_ms: 100,
            jitter_max_ms: 50,
            max_pending_deliveries: 100_000,
            arrival_drift_threshold_ms: 2_000,
        }
    }
}

/// Event generation configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Interval between simulation steps
    pub step_period: Duration,
    /// Probability that a step records a new event (0.0 to 1.0)
    pub event_probability: f64,
    /// Seed for reproducible runs; random when absent
    pub deterministic_seed: Option<u64>,
    /// Package ids the generator picks from
    pub package_ids: Vec<PackageId>,
    /// Event kinds the generator picks from
    pub event_kinds: Vec<EventKind>,
    /// Number of hubs per region used for generated locations
    pub hubs_per_region: u32,
    /// Per-node event log entries merged into the step timeline
    pub timeline_window: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_period: Duration::from_millis(1000),
            event_probability: 0.7,
            deterministic_seed: None,
            package_ids: (1..=5).map(|n| PackageId::new(format!("P{n:03}"))).collect(),
            event_kinds: EventKind::ALL.to_vec(),
            hubs_per_region: 3,
            timeline_window: 50,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: Some(42),
            event_probability: 1.0, // Every step records an event
            ..Self::default()
        }
    }

    /// Creates a configuration for realistic simulation.
    pub fn realistic_simulation() -> Self {
        Self {
            deterministic_seed: None,
            package_ids: (1..=20).map(|n| PackageId::new(format!("P{n:03}"))).collect(),
            hubs_per_region: 5,
            ..Self::default()
        }
    }
}

/// Sizes of bounded logs and accumulators.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Entries kept in each node's event log
    pub event_log: usize,
    /// Anomalies kept by the detector
    pub anomaly_history: usize,
    /// Anomalies kept in the driver's visible list
    pub visible_anomalies: usize,
    /// Delivery attempts kept by the network
    pub delivery_log: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            event_log: 1000,
            anomaly_history: 1000,
            visible_anomalies: 20,
            delivery_log: 1000,
        }
    }
}

/// Anomaly detection thresholds.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Logical gap below which records count as causally adjacent
    pub drift_logical_window: u64,
    /// Physical gap above which adjacent records count as drifted
    pub drift_physical_threshold_ms: u64,
    /// Report each flagged event pair only once across scans
    pub suppress_repeats: bool,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            drift_logical_window: 5,
            drift_physical_threshold_ms: 10_000,
            suppress_repeats: false,
        }
    }
}

/// Topology entry describing one regional node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: String,
    pub region: String,
    /// Base latency of messages sent by this node
    pub latency_ms: u64,
    /// Skew applied to this node's wall clock
    pub clock_offset_ms: i64,
}

impl NodeSpec {
    /// Creates a node entry without clock skew.
    pub fn new(id: impl Into<String>, region: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            latency_ms,
            clock_offset_ms: 0,
        }
    }

    /// Returns this entry with the given clock skew.
    pub fn with_clock_offset(mut self, clock_offset_ms: i64) -> Self {
        self.clock_offset_ms = clock_offset_ms;
        self
    }
}

/// The three-region default topology.
pub fn default_topology() -> Vec<NodeSpec> {
    vec![
        NodeSpec::new("EU-1", "Europe", 120),
        NodeSpec::new("US-1", "US-East", 80),
        NodeSpec::new("APAC-1", "Asia-Pacific", 150),
    ]
}

impl ParcelnetConfig {
    /// Creates the default configuration with the three-region topology.
    pub fn with_default_topology() -> Self {
        Self {
            nodes: default_topology(),
            ..Self::default()
        }
    }

    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        Self::with_default_topology().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `PARCELNET_*` overrides read through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        if let Some(seed) = parsed("PARCELNET_SEED") {
            self.simulation.deterministic_seed = Some(seed);
        }
        if let Some(millis) = parsed("PARCELNET_STEP_PERIOD_MS") {
            self.simulation.step_period = Duration::from_millis(millis);
        }
        if let Some(jitter) = parsed("PARCELNET_JITTER_MS") {
            self.network.jitter_max_ms = jitter;
        }
        if let Some(threshold) = parsed("PARCELNET_ARRIVAL_DRIFT_MS") {
            self.network.arrival_drift_threshold_ms = threshold;
        }
        if let Some(probability) =
            lookup("PARCELNET_EVENT_PROBABILITY").and_then(|value| value.trim().parse::<f64>().ok())
        {
            self.simulation.event_probability = probability;
        }
        if let Some(size) = parsed("PARCELNET_EVENT_LOG_RETENTION") {
            self.retention.event_log = usize::try_from(size).unwrap_or(usize::MAX);
        }
        if let Some(size) = parsed("PARCELNET_ANOMALY_RETENTION") {
            self.retention.anomaly_history = usize::try_from(size).unwrap_or(usize::MAX);
        }

        self
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            simulation: SimulationConfig::deterministic_testing(),
            ..Self::with_default_topology()
        }
    }

    /// Creates a configuration for development with realistic simulation.
    pub fn for_development() -> Self {
        Self {
            simulation: SimulationConfig::realistic_simulation(),
            ..Self::with_default_topology()
        }
    }

    /// Checks ranges and topology consistency.
    ///
    /// # Errors
    /// - `ConfigError::InvalidField` - Zero capacity, empty universe, bad probability
    ///   or a step period the virtual clock cannot advance by
    /// - `ConfigError::DuplicateNode` - Two topology entries share an id
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::InvalidField {
                field,
                reason: reason.to_string(),
            })
        };

        if self.simulation.step_period.is_zero() {
            return invalid("simulation.step_period", "must be greater than zero");
        }
        if self.simulation.step_period > MAX_TIME_ADVANCE {
            return invalid("simulation.step_period", "must not exceed 24 hours");
        }
        if !(0.0..=1.0).contains(&self.simulation.event_probability) {
            return invalid("simulation.event_probability", "must be within [0, 1]");
        }
        if self.simulation.package_ids.is_empty() {
            return invalid("simulation.package_ids", "must not be empty");
        }
        if self.simulation.event_kinds.is_empty() {
            return invalid("simulation.event_kinds", "must not be empty");
        }
        if self.simulation.hubs_per_region == 0 {
            return invalid("simulation.hubs_per_region", "must be greater than zero");
        }
        if self.retention.event_log == 0 {
            return invalid("retention.event_log", "must be greater than zero");
        }
        if self.retention.anomaly_history == 0 {
            return invalid("retention.anomaly_history", "must be greater than zero");
        }
        if self.retention.visible_anomalies == 0 {
            return invalid("retention.visible_anomalies", "must be greater than zero");
        }
        if self.network.max_pending_deliveries == 0 {
            return invalid("network.max_pending_deliveries", "must be greater than zero");
        }

        let mut seen = HashSet::new();
        for spec in &self.nodes {
            if spec.id.trim().is_empty() {
                return invalid("nodes.id", "must not be empty");
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigError::DuplicateNode {
                    id: spec.id.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ParcelnetConfig::with_default_topology();

        assert_eq!(config.network.jitter_max_ms, 50);
        assert_eq!(config.network.arrival_drift_threshold_ms, 2_000);
        assert_eq!(config.simulation.step_period, Duration::from_millis(1000));
        assert_eq!(config.simulation.package_ids.len(), 5);
        assert_eq!(config.simulation.package_ids[0], PackageId::from("P001"));
        assert_eq!(config.retention.event_log, 1000);
        assert_eq!(config.anomaly.drift_logical_window, 5);
        assert!(!config.anomaly.suppress_repeats);
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_presets() {
        let testing = ParcelnetConfig::for_testing();
        assert_eq!(testing.simulation.deterministic_seed, Some(42));
        assert_eq!(testing.nodes, default_topology());

        let development = ParcelnetConfig::for_development();
        assert!(development.simulation.deterministic_seed.is_none());
        assert_eq!(development.simulation.package_ids.len(), 20);
    }

    #[test]
    fn test_overrides_applied_and_garbage_ignored() {
        let vars = HashMap::from([
            ("PARCELNET_SEED", "7"),
            ("PARCELNET_STEP_PERIOD_MS", "250"),
            ("PARCELNET_JITTER_MS", "not-a-number"),
            ("PARCELNET_EVENT_PROBABILITY", "0.25"),
            ("PARCELNET_EVENT_LOG_RETENTION", "64"),
        ]);

        let config = ParcelnetConfig::with_default_topology()
            .with_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.simulation.deterministic_seed, Some(7));
        assert_eq!(config.simulation.step_period, Duration::from_millis(250));
        assert_eq!(config.network.jitter_max_ms, 50);
        assert_eq!(config.simulation.event_probability, 0.25);
        assert_eq!(config.retention.event_log, 64);
        assert_eq!(config.retention.anomaly_history, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ParcelnetConfig::with_default_topology();
        config.simulation.event_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "simulation.event_probability",
                ..
            })
        ));

        let mut config = ParcelnetConfig::with_default_topology();
        config.simulation.package_ids.clear();
        assert!(config.validate().is_err());

        let mut config = ParcelnetConfig::with_default_topology();
        config.retention.event_log = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_step_period_over_a_day() {
        let mut config = ParcelnetConfig::with_default_topology();
        config.simulation.step_period = Duration::from_secs(90_000);

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "simulation.step_period",
                reason: "must not exceed 24 hours".to_string(),
            })
        );

        config.simulation.step_period = MAX_TIME_ADVANCE;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_duplicate_nodes() {
        let mut config = ParcelnetConfig::with_default_topology();
        config.nodes.push(NodeSpec::new("EU-1", "Europe", 10).with_clock_offset(5));

        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateNode {
                id: "EU-1".to_string()
            })
        );
    }
}
