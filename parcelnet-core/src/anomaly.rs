//! Heuristic detection of suspicious package event sequences.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{ClockTimestamp, WallClock};
use crate::config::AnomalyConfig;
use crate::model::{EventKind, EventRecord, NodeId, PackageId};
use crate::node::Node;
use crate::ring_buffer::BoundedLog;
use crate::snapshot::LocalSnapshot;

/// Kind of detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    /// Arrival at one node ordered before a departure recorded by another
    TemporalInconsistency,
    /// Causally adjacent records whose wall times are far apart
    ClockDrift,
}

impl AnomalyKind {
    /// Returns string representation of anomaly kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::TemporalInconsistency => "TEMPORAL_INCONSISTENCY",
            AnomalyKind::ClockDrift => "CLOCK_DRIFT",
        }
    }

    /// Returns the fixed severity of this kind.
    pub fn severity(&self) -> Severity {
        match self {
            AnomalyKind::TemporalInconsistency => Severity::High,
            AnomalyKind::ClockDrift => Severity::Medium,
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => f.write_str("MEDIUM"),
            Severity::High => f.write_str("HIGH"),
        }
    }
}

/// A flagged pair of adjacent records in one package history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub package_id: PackageId,
    pub description: String,
    /// Earlier and later record of the flagged pair
    pub events: (EventRecord, EventRecord),
    pub severity: Severity,
    pub detected_at_wall: u64,
}

/// Anything that exposes per-package event histories to the detector.
pub trait PackageHistories {
    /// Iterates package histories in insertion order.
    fn histories(&self) -> Box<dyn Iterator<Item = (&PackageId, &[EventRecord])> + '_>;
}

impl PackageHistories for Node {
    fn histories(&self) -> Box<dyn Iterator<Item = (&PackageId, &[EventRecord])> + '_> {
        Box::new(
            self.packages()
                .iter()
                .map(|(package_id, history)| (package_id, history.as_slice())),
        )
    }
}

impl PackageHistories for LocalSnapshot {
    fn histories(&self) -> Box<dyn Iterator<Item = (&PackageId, &[EventRecord])> + '_> {
        Box::new(
            self.packages
                .iter()
                .map(|(package_id, history)| (package_id, history.as_slice())),
        )
    }
}

impl PackageHistories for BTreeMap<PackageId, Vec<EventRecord>> {
    fn histories(&self) -> Box<dyn Iterator<Item = (&PackageId, &[EventRecord])> + '_> {
        Box::new(
            self.iter()
                .map(|(package_id, history)| (package_id, history.as_slice())),
        )
    }
}

type PairKey = (AnomalyKind, PackageId, NodeId, ClockTimestamp, NodeId, ClockTimestamp);

/// Scans package histories for temporal inconsistencies and clock drift.
///
/// Each scan re-examines full histories. Unless
/// [`AnomalyConfig::suppress_repeats`] is set, an anomaly found in one scan is
/// reported again by every later scan that still sees the same pair. With
/// suppression on, the detector remembers as many pairs as it keeps
/// anomalies; a pair forgotten through eviction is reported again.
#[derive(Debug)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    wall: Arc<dyn WallClock>,
    accumulated: BoundedLog<Anomaly>,
    reported: HashSet<PairKey>,
    reported_order: VecDeque<PairKey>,
    reported_capacity: usize,
}

impl AnomalyDetector {
    /// Creates a detector keeping at most `history_capacity` anomalies.
    pub fn new(config: AnomalyConfig, wall: Arc<dyn WallClock>, history_capacity: usize) -> Self {
        Self {
            config,
            wall,
            accumulated: BoundedLog::with_capacity(history_capacity),
            reported: HashSet::new(),
            reported_order: VecDeque::new(),
            reported_capacity: history_capacity.max(1),
        }
    }

    /// Scans every source and returns anomalies found in this pass.
    ///
    /// Found anomalies are also appended to the accumulator. Histories are
    /// never modified.
    pub fn scan<'a, H>(&mut self, sources: impl IntoIterator<Item = &'a H>) -> Vec<Anomaly>
    where
        H: PackageHistories + ?Sized + 'a,
    {
        let detected_at_wall = self.wall.now_ms();
        let mut found = Vec::new();

        for source in sources {
            for (package_id, history) in source.histories() {
                let mut ordered: Vec<&EventRecord> = history.iter().collect();
                ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

                for pair in ordered.windows(2) {
                    let (prev, curr) = (pair[0], pair[1]);
                    for kind in self.classify(prev, curr) {
                        if self.config.suppress_repeats && !self.remember_pair(pair_key(kind, package_id, prev, curr)) {
                            continue;
                        }
                        found.push(Anomaly {
                            kind,
                            package_id: package_id.clone(),
                            description: describe(kind, package_id, prev, curr),
                            events: (prev.clone(), curr.clone()),
                            severity: kind.severity(),
                            detected_at_wall,
                        });
                    }
                }
            }
        }

        if !found.is_empty() {
            tracing::debug!(count = found.len(), "Detected anomalies");
        }
        self.accumulated.extend(found.iter().cloned());
        found
    }

    /// Returns up to `limit` accumulated anomalies, most recently detected first.
    pub fn recent(&self, limit: usize) -> Vec<Anomaly> {
        let mut recent: Vec<Anomaly> = self.accumulated.iter_newest_first().cloned().collect();
        recent.sort_by(|a, b| b.detected_at_wall.cmp(&a.detected_at_wall));
        recent.truncate(limit);
        recent
    }

    /// Returns number of accumulated anomalies.
    pub fn len(&self) -> usize {
        self.accumulated.len()
    }

    /// Returns true when nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    /// Drops accumulated anomalies and repeat suppression memory.
    pub fn clear(&mut self) {
        self.accumulated.clear();
        self.reported.clear();
        self.reported_order.clear();
    }

    /// Returns false if the pair was already reported.
    fn remember_pair(&mut self, key: PairKey) -> bool {
        if self.reported.contains(&key) {
            return false;
        }
        if self.reported_order.len() == self.reported_capacity {
            if let Some(oldest) = self.reported_order.pop_front() {
                self.reported.remove(&oldest);
            }
        }
        self.reported.insert(key.clone());
        self.reported_order.push_back(key);
        true
    }

    fn classify(&self, prev: &EventRecord, curr: &EventRecord) -> Vec<AnomalyKind> {
        let mut kinds = Vec::new();

        if prev.kind == EventKind::Arrived
            && curr.kind == EventKind::Departed
            && prev.origin != curr.origin
        {
            kinds.push(AnomalyKind::TemporalInconsistency);
        }

        let logical_gap = prev.timestamp.logical.abs_diff(curr.timestamp.logical);
        let physical_gap = prev.timestamp.physical.abs_diff(curr.timestamp.physical);
        if logical_gap < self.config.drift_logical_window
            && physical_gap > self.config.drift_physical_threshold_ms
        {
            kinds.push(AnomalyKind::ClockDrift);
        }

        kinds
    }
}

fn pair_key(kind: AnomalyKind, package_id: &PackageId, prev: &EventRecord, curr: &EventRecord) -> PairKey {
    (
        kind,
        package_id.clone(),
        prev.origin.clone(),
        prev.timestamp,
        curr.origin.clone(),
        curr.timestamp,
    )
}

fn describe(kind: AnomalyKind, package_id: &PackageId, prev: &EventRecord, curr: &EventRecord) -> String {
    match kind {
        AnomalyKind::TemporalInconsistency => format!(
            "Package {package_id} arrived at {} before departing from {}",
            prev.region, curr.region
        ),
        AnomalyKind::ClockDrift => format!(
            "Significant clock drift detected between {} and {}",
            prev.region, curr.region
        ),
    }
}
