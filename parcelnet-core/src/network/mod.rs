//! Message routing between registered nodes.
//!
//! The network owns every node and the delivery queue. Nodes mutate only
//! their own state; the network is the only place that looks nodes up by id
//! and hands them messages.

mod delivery;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub use delivery::{DeliveryQueue, ScheduledDelivery, Transport};
use serde::Serialize;
use thiserror::Error;

use crate::clock::WallClock;
use crate::config::{NetworkConfig, NodeSpec};
use crate::message::{Message, MessageBody, MessageId, MessageKind, PackageUpdate, SnapshotReport};
use crate::model::{EventKind, EventRecord, NodeId, PackageId};
use crate::node::{Node, NodeError, ReceiveOutcome};
use crate::ring_buffer::BoundedLog;
use crate::rng::DeterministicRng;

/// Errors from routing operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// No node registered under this id
    #[error("Unknown node: {node_id}")]
    UnknownNode {
        /// Requested node
        node_id: NodeId,
    },

    /// Message sender differs from the node asked to send it
    #[error("Message {message_id} from {sender} cannot be sent by {node}")]
    SenderMismatch {
        /// Offending message
        message_id: MessageId,
        /// Sender named in the envelope
        sender: NodeId,
        /// Node asked to send
        node: NodeId,
    },

    /// Delivery queue is full
    #[error("Delivery queue overflow: {pending} deliveries pending")]
    QueueOverflow {
        /// Deliveries pending when the message was refused
        pending: usize,
    },
}

/// Counters maintained by the network since creation or last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped_unroutable: u64,
    pub dropped_stale: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// Accepted deliveries whose arrival drifted past the threshold
    pub arrival_drifts: u64,
}

/// Final status of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Applied,
    SnapshotTaken,
    SnapshotReported,
    Duplicate,
    Rejected,
    Unroutable,
    Stale,
}

/// Entry of the network's bounded delivery log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub kind: MessageKind,
    pub sender: NodeId,
    pub receiver: Option<NodeId>,
    /// Sampled latency for queued deliveries, `None` for direct ones
    pub latency_ms: Option<u64>,
    pub status: DeliveryStatus,
    pub delivered_at_wall: u64,
}

/// Result of handing one message to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Receiver accepted the message
    Received(ReceiveOutcome),
    /// Receiver refused the message
    Rejected(NodeError),
    /// Receiver missing or not registered; message dropped
    Unroutable,
    /// Message belongs to a generation before the last reset
    Stale,
}

/// Aggregate view of the nodes in one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub region: String,
    pub node_count: usize,
    pub package_count: usize,
    pub in_flight_count: usize,
}

/// Accepted delivery whose send stamp and arrival time disagree by more
/// than [`NetworkConfig::arrival_drift_threshold_ms`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrivalDrift {
    pub message_id: MessageId,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub receiver_region: String,
    /// Physical part of the sender's stamp
    pub sent_physical: u64,
    /// Receiver's wall clock, including its skew, at arrival
    pub arrival_wall: u64,
    pub drift_ms: u64,
}

/// Drifted arrivals counted per receiving region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionDriftSummary {
    pub region: String,
    pub arrival_drifts: u64,
    pub max_drift_ms: u64,
}

/// Local state reported back to a snapshot requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotArrival {
    /// Node the report was delivered to
    pub receiver: NodeId,
    pub report: SnapshotReport,
}

/// Router that owns registered nodes and pending deliveries.
#[derive(Debug)]
pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    queue: DeliveryQueue,
    wall: Arc<dyn WallClock>,
    stats: NetworkStats,
    delivered: BoundedLog<DeliveryRecord>,
    snapshot_arrivals: Vec<SnapshotArrival>,
    arrival_drifts: BoundedLog<ArrivalDrift>,
    region_drifts: BTreeMap<String, RegionDriftSummary>,
    drift_threshold_ms: u64,
    event_log_capacity: usize,
}

impl Network {
    /// Creates an empty network.
    ///
    /// The delivery log capacity also bounds the log of drifted arrivals.
    pub fn new(
        config: &NetworkConfig,
        wall: Arc<dyn WallClock>,
        rng: DeterministicRng,
        event_log_capacity: usize,
        delivery_log_capacity: usize,
    ) -> Self {
        let queue = DeliveryQueue::new(
            Arc::clone(&wall),
            rng,
            Duration::from_millis(config.jitter_max_ms),
            config.max_pending_deliveries,
        );

        Self {
            nodes: BTreeMap::new(),
            queue,
            wall,
            stats: NetworkStats::default(),
            delivered: BoundedLog::with_capacity(delivery_log_capacity),
            snapshot_arrivals: Vec::new(),
            arrival_drifts: BoundedLog::with_capacity(delivery_log_capacity),
            region_drifts: BTreeMap::new(),
            drift_threshold_ms: config.arrival_drift_threshold_ms,
            event_log_capacity,
        }
    }

    /// Returns wall clock shared by the queue and node clocks.
    pub fn wall(&self) -> &Arc<dyn WallClock> {
        &self.wall
    }

    /// Registers a node. Returns false and keeps the existing node if the id
    /// is already registered.
    pub fn register(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(node.id()) {
            tracing::debug!(node = %node.id(), "Node already registered");
            return false;
        }
        tracing::debug!(node = %node.id(), region = node.region(), "Registered node");
        self.nodes.insert(node.id().clone(), node);
        true
    }

    /// Builds a node from its topology entry and registers it.
    pub fn register_spec(&mut self, spec: &NodeSpec) -> bool {
        let node = Node::from_spec(spec, Arc::clone(&self.wall), self.event_log_capacity);
        self.register(node)
    }

    /// Unregisters a node. Messages still addressed to it become unroutable.
    pub fn remove(&mut self, node_id: &str) -> Option<Node> {
        self.nodes.remove(node_id)
    }

    /// Returns a registered node.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Returns a registered node for mutation.
    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Iterates nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates nodes in id order for mutation.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Returns registered ids in order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Returns number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sends a message through the named node.
    ///
    /// # Errors
    /// - `NetworkError::UnknownNode` - Sender not registered
    /// - `NetworkError::SenderMismatch` - Envelope names a different sender
    /// - `NetworkError::QueueOverflow` - Delivery queue is full
    pub fn send(&mut self, sender_id: &NodeId, message: Message) -> Result<MessageId, NetworkError> {
        if message.sender() != sender_id {
            return Err(NetworkError::SenderMismatch {
                message_id: message.id(),
                sender: message.sender().clone(),
                node: sender_id.clone(),
            });
        }

        let node = self
            .nodes
            .get_mut(sender_id)
            .ok_or_else(|| NetworkError::UnknownNode {
                node_id: sender_id.clone(),
            })?;
        let id = node.send(message, &mut self.queue)?;
        self.stats.sent += 1;
        Ok(id)
    }

    /// Sends an independent copy of `template` to every node except the sender.
    ///
    /// Each copy gets its own id and its own sampled latency. Fan-out order
    /// across receivers carries no meaning.
    ///
    /// # Errors
    /// - `NetworkError::UnknownNode` - Sender not registered
    /// - `NetworkError::SenderMismatch` - Template names a different sender
    /// - `NetworkError::QueueOverflow` - Delivery queue filled up mid fan-out
    pub fn broadcast(
        &mut self,
        sender_id: &NodeId,
        template: &Message,
    ) -> Result<Vec<MessageId>, NetworkError> {
        if !self.nodes.contains_key(sender_id) {
            return Err(NetworkError::UnknownNode {
                node_id: sender_id.clone(),
            });
        }

        let receivers: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| *id != sender_id)
            .cloned()
            .collect();

        let mut ids = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            ids.push(self.send(sender_id, template.addressed_to(receiver))?);
        }
        Ok(ids)
    }

    /// Records a local event on `node_id` and broadcasts it as a package update.
    ///
    /// # Errors
    /// - `NetworkError::UnknownNode` - Node not registered
    /// - `NetworkError::QueueOverflow` - Delivery queue filled up mid fan-out
    pub fn publish_event(
        &mut self,
        node_id: &NodeId,
        package_id: PackageId,
        kind: EventKind,
        location: impl Into<String>,
    ) -> Result<(EventRecord, Vec<MessageId>), NetworkError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| NetworkError::UnknownNode {
                node_id: node_id.clone(),
            })?;
        let record = node.record_local_event(package_id, kind, location);

        let template = Message::new(
            MessageBody::PackageUpdate(PackageUpdate::from_record(&record)),
            node_id.clone(),
            None,
        );
        let ids = self.broadcast(node_id, &template)?;
        Ok((record, ids))
    }

    /// Hands a message straight to its receiver, bypassing the queue.
    ///
    /// Messages for unknown or missing receivers are dropped and counted.
    /// Snapshot requests are answered with a response sent back through the
    /// queue.
    pub fn deliver(&mut self, message: Message) -> DeliveryOutcome {
        self.route(message, None)
    }

    /// Delivers every queued message whose due time has passed.
    ///
    /// Returns number of deliveries processed, including stale ones.
    pub fn deliver_due(&mut self) -> usize {
        let now = self.queue.now_ms();
        self.drain(now)
    }

    /// Delivers every queued message regardless of due time.
    pub fn deliver_all(&mut self) -> usize {
        self.drain(u64::MAX)
    }

    /// Returns number of queued deliveries.
    pub fn pending_deliveries(&self) -> usize {
        self.queue.len()
    }

    /// Returns current generation.
    pub fn generation(&self) -> u64 {
        self.queue.generation()
    }

    /// Clears every node's state and starts a new generation.
    ///
    /// Queued deliveries are not cancelled; they are dropped as stale when
    /// they come due.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.reset();
        }
        let generation = self.queue.advance_generation();
        self.stats = NetworkStats::default();
        self.delivered.clear();
        self.snapshot_arrivals.clear();
        self.arrival_drifts.clear();
        self.region_drifts.clear();
        tracing::debug!(generation, "Network reset");
    }

    /// Returns counters since creation or last reset.
    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    /// Returns recent delivery attempts, oldest first.
    pub fn delivered(&self) -> &BoundedLog<DeliveryRecord> {
        &self.delivered
    }

    /// Takes snapshot reports delivered since the last call.
    pub fn take_snapshot_arrivals(&mut self) -> Vec<SnapshotArrival> {
        std::mem::take(&mut self.snapshot_arrivals)
    }

    /// Returns recent drifted arrivals, oldest first.
    pub fn arrival_drifts(&self) -> &BoundedLog<ArrivalDrift> {
        &self.arrival_drifts
    }

    /// Drifted arrival counts per receiving region, in region name order.
    ///
    /// Regions without a drifted arrival are omitted.
    pub fn region_drift_summaries(&self) -> Vec<RegionDriftSummary> {
        self.region_drifts.values().cloned().collect()
    }

    /// Merges every node's history of one package in hybrid clock order.
    pub fn package_timeline(&self, package_id: &str) -> Vec<EventRecord> {
        let mut timeline: Vec<EventRecord> = self
            .nodes
            .values()
            .flat_map(|node| node.history(package_id).iter().cloned())
            .collect();
        timeline.sort_by(EventRecord::causal_cmp);
        timeline
    }

    /// Summarizes nodes grouped by region, in region name order.
    pub fn region_summaries(&self) -> Vec<RegionSummary> {
        let mut regions: BTreeMap<&str, (usize, BTreeSet<&PackageId>, usize)> = BTreeMap::new();
        for node in self.nodes.values() {
            let entry = regions.entry(node.region()).or_default();
            entry.0 += 1;
            entry.1.extend(node.packages().keys());
            entry.2 += node.in_flight().len();
        }

        regions
            .into_iter()
            .map(|(region, (node_count, packages, in_flight_count))| RegionSummary {
                region: region.to_string(),
                node_count,
                package_count: packages.len(),
                in_flight_count,
            })
            .collect()
    }

    fn drain(&mut self, now_ms: u64) -> usize {
        let mut processed = 0;
        while let Some(delivery) = self.queue.pop_due(now_ms) {
            processed += 1;
            if delivery.generation != self.queue.generation() {
                self.stats.dropped_stale += 1;
                tracing::trace!(message = %delivery.message.id(), "Dropping stale delivery");
                self.log_delivery(&delivery.message, Some(delivery.delay), DeliveryStatus::Stale);
                continue;
            }
            self.route(delivery.message, Some(delivery.delay));
        }
        processed
    }

    fn route(&mut self, message: Message, delay: Option<Duration>) -> DeliveryOutcome {
        let receiver = match message.receiver() {
            Some(id) if self.nodes.contains_key(id) => id.clone(),
            other => {
                self.stats.dropped_unroutable += 1;
                tracing::warn!(
                    message = %message.id(),
                    receiver = ?other,
                    "Dropping message for unknown receiver"
                );
                self.log_delivery(&message, delay, DeliveryStatus::Unroutable);
                return DeliveryOutcome::Unroutable;
            }
        };

        let result = match self.nodes.get_mut(&receiver) {
            Some(node) => node.receive(message.clone()),
            None => return DeliveryOutcome::Unroutable,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                self.stats.rejected += 1;
                tracing::warn!(node = %receiver, %error, "Rejected message");
                self.log_delivery(&message, delay, DeliveryStatus::Rejected);
                return DeliveryOutcome::Rejected(error);
            }
        };

        if let Some(sender) = self.nodes.get_mut(message.sender()) {
            sender.acknowledge(message.id());
        }
        if !matches!(outcome, ReceiveOutcome::Duplicate) {
            self.check_arrival_drift(&message, &receiver);
        }

        let status = match &outcome {
            ReceiveOutcome::Duplicate => {
                self.stats.duplicates += 1;
                DeliveryStatus::Duplicate
            }
            ReceiveOutcome::Applied(_) => {
                self.stats.delivered += 1;
                DeliveryStatus::Applied
            }
            ReceiveOutcome::SnapshotTaken { request_id, snapshot } => {
                self.stats.delivered += 1;
                let report = SnapshotReport {
                    request_id: *request_id,
                    summary: snapshot.summary(),
                    in_flight: snapshot.in_flight.clone(),
                };
                let reply = Message::new(
                    MessageBody::SnapshotResponse(Box::new(report)),
                    receiver.clone(),
                    Some(message.sender().clone()),
                );
                if let Err(error) = self.send(&receiver, reply) {
                    tracing::warn!(node = %receiver, %error, "Failed to answer snapshot request");
                }
                DeliveryStatus::SnapshotTaken
            }
            ReceiveOutcome::SnapshotReported(report) => {
                self.stats.delivered += 1;
                self.snapshot_arrivals.push(SnapshotArrival {
                    receiver: receiver.clone(),
                    report: report.as_ref().clone(),
                });
                DeliveryStatus::SnapshotReported
            }
        };

        tracing::trace!(
            message = %message.id(),
            kind = message.kind().as_str(),
            sender = %message.sender(),
            receiver = %receiver,
            "Delivered message"
        );
        self.log_delivery(&message, delay, status);
        DeliveryOutcome::Received(outcome)
    }

    fn check_arrival_drift(&mut self, message: &Message, receiver: &NodeId) {
        let Some(node) = self.nodes.get(receiver) else {
            return;
        };
        let arrival_wall = node.clock().wall_now();
        let sent_physical = message.timestamp().physical;
        let drift_ms = arrival_wall.abs_diff(sent_physical);
        if drift_ms <= self.drift_threshold_ms {
            return;
        }

        let region = node.region().to_string();
        self.stats.arrival_drifts += 1;
        let summary = self
            .region_drifts
            .entry(region.clone())
            .or_insert_with(|| RegionDriftSummary {
                region: region.clone(),
                arrival_drifts: 0,
                max_drift_ms: 0,
            });
        summary.arrival_drifts += 1;
        summary.max_drift_ms = summary.max_drift_ms.max(drift_ms);

        tracing::debug!(
            message = %message.id(),
            sender = %message.sender(),
            receiver = %receiver,
            drift_ms,
            "Arrival drift above threshold"
        );
        self.arrival_drifts.push(ArrivalDrift {
            message_id: message.id(),
            sender: message.sender().clone(),
            receiver: receiver.clone(),
            receiver_region: region,
            sent_physical,
            arrival_wall,
            drift_ms,
        });
    }

    fn log_delivery(&mut self, message: &Message, delay: Option<Duration>, status: DeliveryStatus) {
        self.delivered.push(DeliveryRecord {
            message_id: message.id(),
            kind: message.kind(),
            sender: message.sender().clone(),
            receiver: message.receiver().cloned(),
            latency_ms: delay.map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            status,
            delivered_at_wall: self.queue.now_ms(),
        });
    }
}
