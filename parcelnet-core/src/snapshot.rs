//! Local and global snapshots of tracking state.
//!
//! Global snapshots are approximate cuts. Local captures happen one node at
//! a time with no marker protocol, so a message in transit between two
//! captures may show up in the sender's in-flight set, in the receiver's
//! history, in both, or in neither. Consumers must not treat a global
//! snapshot as a consistent cut of the whole network.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{ClockTimestamp, WallClock};
use crate::message::{Message, MessageBody, SnapshotId, SnapshotReport};
use crate::model::{EventRecord, NodeId, PackageId};
use crate::network::{Network, NetworkError};
use crate::node::Node;

/// Independent copy of one node's packages and in-flight messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub node_id: NodeId,
    pub region: String,
    /// Clock reading issued after the copy was made
    pub timestamp: ClockTimestamp,
    pub packages: BTreeMap<PackageId, Vec<EventRecord>>,
    pub in_flight: Vec<Message>,
    /// Event log length at capture time
    pub event_count: usize,
}

impl LocalSnapshot {
    /// Returns the latest record of every package in hybrid clock order.
    pub fn latest(&self) -> BTreeMap<PackageId, EventRecord> {
        self.packages
            .iter()
            .filter_map(|(package_id, history)| {
                history
                    .iter()
                    .max_by(|a, b| a.causal_cmp(b))
                    .map(|record| (package_id.clone(), record.clone()))
            })
            .collect()
    }

    /// Condenses this snapshot into the per-node summary of a global snapshot.
    pub fn summary(&self) -> NodeSnapshotSummary {
        NodeSnapshotSummary {
            node_id: self.node_id.clone(),
            region: self.region.clone(),
            clock: self.timestamp,
            package_count: self.packages.len(),
            event_count: self.event_count,
            in_flight_count: self.in_flight.len(),
            latest: self.latest(),
        }
    }
}

/// Per-node entry of a global snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshotSummary {
    pub node_id: NodeId,
    pub region: String,
    pub clock: ClockTimestamp,
    pub package_count: usize,
    pub event_count: usize,
    pub in_flight_count: usize,
    pub latest: BTreeMap<PackageId, EventRecord>,
}

/// Aggregated view over every node's local snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub taken_at_wall: u64,
    pub per_node: BTreeMap<NodeId, NodeSnapshotSummary>,
    /// Every in-flight message reported by any node
    pub in_flight: Vec<Message>,
    /// Latest known record per package across all nodes
    pub latest: BTreeMap<PackageId, EventRecord>,
}

/// Keeps whichever of the known and offered record is causally later.
fn keep_latest(latest: &mut BTreeMap<PackageId, EventRecord>, package_id: &PackageId, record: &EventRecord) {
    match latest.get(package_id) {
        Some(known) if known.causal_cmp(record).is_ge() => {}
        _ => {
            latest.insert(package_id.clone(), record.clone());
        }
    }
}

impl GlobalSnapshot {
    fn assemble(
        taken_at_wall: u64,
        reports: impl IntoIterator<Item = (NodeSnapshotSummary, Vec<Message>)>,
    ) -> Self {
        let mut per_node = BTreeMap::new();
        let mut in_flight = Vec::new();
        let mut latest: BTreeMap<PackageId, EventRecord> = BTreeMap::new();

        for (summary, messages) in reports {
            for (package_id, record) in &summary.latest {
                keep_latest(&mut latest, package_id, record);
            }
            in_flight.extend(messages);
            per_node.insert(summary.node_id.clone(), summary);
        }

        Self {
            taken_at_wall,
            per_node,
            in_flight,
            latest,
        }
    }

    /// Returns number of distinct packages known to any node.
    pub fn total_packages(&self) -> usize {
        self.latest.len()
    }

    /// Returns number of in-flight messages across all nodes.
    pub fn total_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Compares latest package records against an earlier snapshot.
    ///
    /// A package counts as updated only when its record here is causally
    /// later than the one in `previous`.
    pub fn diff(&self, previous: &GlobalSnapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (package_id, record) in &self.latest {
            match previous.latest.get(package_id) {
                None => diff.added.push(package_id.clone()),
                Some(before) if record.causal_cmp(before).is_gt() => {
                    diff.updated.push(package_id.clone());
                }
                Some(_) => {}
            }
        }
        diff.removed = previous
            .latest
            .keys()
            .filter(|package_id| !self.latest.contains_key(*package_id))
            .cloned()
            .collect();

        diff
    }
}

/// Package level changes between two global snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<PackageId>,
    pub updated: Vec<PackageId>,
    pub removed: Vec<PackageId>,
}

impl SnapshotDiff {
    /// Returns true when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Merged view of the nodes in one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub region: String,
    pub taken_at_wall: u64,
    pub per_node: BTreeMap<NodeId, NodeSnapshotSummary>,
    pub in_flight_count: usize,
    /// Latest known record per package across the region's nodes
    pub latest: BTreeMap<PackageId, EventRecord>,
}

impl RegionSnapshot {
    fn new(region: &str, taken_at_wall: u64) -> Self {
        Self {
            region: region.to_string(),
            taken_at_wall,
            per_node: BTreeMap::new(),
            in_flight_count: 0,
            latest: BTreeMap::new(),
        }
    }

    fn absorb(&mut self, summary: NodeSnapshotSummary) {
        for (package_id, record) in &summary.latest {
            keep_latest(&mut self.latest, package_id, record);
        }
        self.in_flight_count += summary.in_flight_count;
        self.per_node.insert(summary.node_id.clone(), summary);
    }
}

/// Region snapshots rolled up into one view.
///
/// Each region is merged first; the global `latest` then keeps the causally
/// later record per package across regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchicalSnapshot {
    pub taken_at_wall: u64,
    pub regions: BTreeMap<String, RegionSnapshot>,
    pub latest: BTreeMap<PackageId, EventRecord>,
}

impl HierarchicalSnapshot {
    /// Returns number of distinct packages known to any region.
    pub fn total_packages(&self) -> usize {
        self.latest.len()
    }
}

#[derive(Debug)]
struct PendingCapture {
    request_id: SnapshotId,
    initiator: NodeId,
    expected: BTreeSet<NodeId>,
    reports: BTreeMap<NodeId, SnapshotReport>,
}

/// Captures global snapshots.
///
/// [`capture_global`](Self::capture_global) snapshots every node in turn
/// and returns immediately. [`request_via_network`](Self::request_via_network)
/// sends snapshot requests through the network and
/// [`collect`](Self::collect) assembles the result once every node answered.
/// Both produce approximate cuts as described in the module docs.
#[derive(Debug)]
pub struct SnapshotCoordinator {
    wall: Arc<dyn WallClock>,
    pending: Option<PendingCapture>,
}

impl SnapshotCoordinator {
    /// Creates a coordinator that stamps snapshots with `wall` time.
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self {
            wall,
            pending: None,
        }
    }

    /// Snapshots every node synchronously and aggregates the results.
    pub fn capture_global<'a>(&self, nodes: impl IntoIterator<Item = &'a mut Node>) -> GlobalSnapshot {
        let reports = nodes.into_iter().map(|node| {
            let snapshot = node.initiate_snapshot();
            (snapshot.summary(), snapshot.in_flight)
        });
        let snapshot = GlobalSnapshot::assemble(self.wall.now_ms(), reports.collect::<Vec<_>>());

        tracing::debug!(
            nodes = snapshot.per_node.len(),
            packages = snapshot.total_packages(),
            in_flight = snapshot.total_in_flight(),
            "Captured global snapshot"
        );
        snapshot
    }

    /// Snapshots the nodes of one region and merges them.
    ///
    /// Nodes of other regions are not touched. Returns `None` when no node
    /// belongs to `region`.
    pub fn capture_region<'a>(
        &self,
        region: &str,
        nodes: impl IntoIterator<Item = &'a mut Node>,
    ) -> Option<RegionSnapshot> {
        let mut merged = RegionSnapshot::new(region, self.wall.now_ms());
        for node in nodes.into_iter().filter(|node| node.region() == region) {
            merged.absorb(node.initiate_snapshot().summary());
        }
        if merged.per_node.is_empty() {
            tracing::debug!(region, "No nodes in region to snapshot");
            return None;
        }
        Some(merged)
    }

    /// Snapshots every node, merges per region, then rolls the regions up.
    pub fn capture_hierarchical<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a mut Node>,
    ) -> HierarchicalSnapshot {
        let taken_at_wall = self.wall.now_ms();
        let mut regions: BTreeMap<String, RegionSnapshot> = BTreeMap::new();
        for node in nodes {
            let summary = node.initiate_snapshot().summary();
            regions
                .entry(summary.region.clone())
                .or_insert_with(|| RegionSnapshot::new(&summary.region, taken_at_wall))
                .absorb(summary);
        }

        let mut latest = BTreeMap::new();
        for region in regions.values() {
            for (package_id, record) in &region.latest {
                keep_latest(&mut latest, package_id, record);
            }
        }

        tracing::debug!(regions = regions.len(), packages = latest.len(), "Captured hierarchical snapshot");
        HierarchicalSnapshot {
            taken_at_wall,
            regions,
            latest,
        }
    }

    /// Starts a message-driven capture initiated by `initiator`.
    ///
    /// The initiator snapshots itself immediately and asks every other node
    /// for its state. Starting a new capture abandons any pending one; late
    /// answers to the abandoned round are ignored by [`collect`](Self::collect).
    /// Returns number of requests sent.
    ///
    /// # Errors
    /// - `NetworkError::UnknownNode` - Initiator not registered
    /// - `NetworkError::QueueOverflow` - Delivery queue is full
    pub fn request_via_network(
        &mut self,
        network: &mut Network,
        initiator: &NodeId,
    ) -> Result<usize, NetworkError> {
        let node = network
            .node_mut(initiator.as_str())
            .ok_or_else(|| NetworkError::UnknownNode {
                node_id: initiator.clone(),
            })?;
        let own = node.initiate_snapshot();

        let request_id = SnapshotId::generate();
        let template = Message::new(MessageBody::SnapshotRequest(request_id), initiator.clone(), None);
        let sent = network.broadcast(initiator, &template)?;

        let mut reports = BTreeMap::new();
        reports.insert(
            initiator.clone(),
            SnapshotReport {
                request_id,
                summary: own.summary(),
                in_flight: own.in_flight,
            },
        );
        self.pending = Some(PendingCapture {
            request_id,
            initiator: initiator.clone(),
            expected: network.node_ids().into_iter().collect(),
            reports,
        });

        tracing::debug!(%initiator, %request_id, requests = sent.len(), "Requested snapshot via network");
        Ok(sent.len())
    }

    /// Returns true while a message-driven capture awaits responses.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Absorbs delivered snapshot responses and returns the global snapshot
    /// once every expected node has reported.
    pub fn collect(&mut self, network: &mut Network) -> Option<GlobalSnapshot> {
        let arrivals = network.take_snapshot_arrivals();
        let pending = self.pending.as_mut()?;

        for arrival in arrivals {
            if arrival.receiver != pending.initiator {
                continue;
            }
            if arrival.report.request_id != pending.request_id {
                tracing::trace!(
                    from = %arrival.report.summary.node_id,
                    round = %arrival.report.request_id,
                    "Ignoring snapshot response from an earlier round"
                );
                continue;
            }
            let node_id = arrival.report.summary.node_id.clone();
            pending.reports.insert(node_id, arrival.report);
        }

        // Nodes removed since the request will never answer.
        let registered: BTreeSet<NodeId> = network.node_ids().into_iter().collect();
        pending.expected.retain(|id| registered.contains(id));

        let complete = pending
            .expected
            .iter()
            .all(|id| pending.reports.contains_key(id));
        if !complete {
            return None;
        }

        let pending = self.pending.take()?;
        Some(GlobalSnapshot::assemble(
            self.wall.now_ms(),
            pending
                .reports
                .into_values()
                .map(|report| (report.summary, report.in_flight)),
        ))
    }
}
