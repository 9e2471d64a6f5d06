//! Driver status, timeline entries and metrics collection.

use std::collections::BTreeMap;

use parcelnet_core::{Anomaly, LogEntry, NodeId};
use serde::Serialize;

/// Lifecycle state of the periodic driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// Created or reset; no steps run until started
    #[default]
    Idle,
    /// Steps run on every tick
    Running,
    /// Steps suspended; deliveries continue
    Paused,
}

/// One entry of the combined timeline across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Node whose event log holds the entry
    pub node_id: NodeId,
    /// The log entry itself
    pub entry: LogEntry,
}

/// Metrics collected during a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationMetrics {
    /// Steps executed
    pub steps: u64,
    /// Local events recorded by the generator or injected
    pub events_generated: u64,
    /// Messages handed to the network
    pub messages_sent: u64,
    /// Anomalies returned by all scans, repeats included
    pub anomalies_detected: u64,
    /// Anomalies by kind
    pub anomalies_by_kind: BTreeMap<String, u64>,
}

impl SimulationMetrics {
    /// Creates new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one executed step.
    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    /// Records a recorded local event and the copies broadcast for it.
    pub fn record_event(&mut self, copies_sent: usize) {
        self.events_generated += 1;
        self.messages_sent += copies_sent as u64;
    }

    /// Records anomalies returned by one scan.
    pub fn record_anomalies(&mut self, anomalies: &[Anomaly]) {
        self.anomalies_detected += anomalies.len() as u64;
        for anomaly in anomalies {
            *self
                .anomalies_by_kind
                .entry(anomaly.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
    }
}
