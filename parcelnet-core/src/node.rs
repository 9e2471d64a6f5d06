//! Regional tracking node.
//!
//! A node exclusively owns its clock, package histories, in-flight set and
//! event log. Everything else observes it through shared references or asks
//! it to mutate itself through the operations below.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::clock::{ClockTimestamp, HybridClock, WallClock};
use crate::config::NodeSpec;
use crate::message::{Message, MessageBody, MessageId, SnapshotId, SnapshotReport};
use crate::model::{EventKind, EventRecord, LogEntry, NodeId, PackageId, ReceiptRecord};
use crate::network::{NetworkError, Transport};
use crate::ring_buffer::BoundedLog;
use crate::snapshot::LocalSnapshot;

/// Number of recently received message ids remembered for de-duplication.
const DEDUP_WINDOW: usize = 10_000;

/// Errors raised at a node's receive boundary.
///
/// A rejected message leaves the node's packages, event log and clock
/// untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// Package update is missing a required field
    #[error("Malformed payload in message {message_id}: missing {field}")]
    MalformedPayload {
        /// Offending message
        message_id: MessageId,
        /// First empty required field
        field: &'static str,
    },

    /// Message was handed to a node other than its receiver
    #[error("Message {message_id} addressed to {addressed:?} was delivered to {node}")]
    Misaddressed {
        /// Offending message
        message_id: MessageId,
        /// Receiver named in the envelope
        addressed: Option<NodeId>,
        /// Node the message was handed to
        node: NodeId,
    },
}

/// What a node did with an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A remote record was appended to the package history
    Applied(EventRecord),
    /// A local snapshot was taken for the requester
    SnapshotTaken {
        /// Round named by the request
        request_id: SnapshotId,
        snapshot: Box<LocalSnapshot>,
    },
    /// A peer reported its local state for aggregation
    SnapshotReported(Box<SnapshotReport>),
    /// The message id was already received; nothing changed
    Duplicate,
}

/// Regional tracking node.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    region: String,
    latency: Duration,
    clock: HybridClock,
    packages: BTreeMap<PackageId, Vec<EventRecord>>,
    in_flight: Vec<Message>,
    event_log: BoundedLog<LogEntry>,
    seen: HashSet<MessageId>,
    seen_order: VecDeque<MessageId>,
}

impl Node {
    /// Creates a node with an empty history.
    pub fn new(
        id: NodeId,
        region: impl Into<String>,
        latency: Duration,
        clock: HybridClock,
        event_log_capacity: usize,
    ) -> Self {
        Self {
            id,
            region: region.into(),
            latency,
            clock,
            packages: BTreeMap::new(),
            in_flight: Vec::new(),
            event_log: BoundedLog::with_capacity(event_log_capacity),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// Creates a node from its configured topology entry.
    pub fn from_spec(spec: &NodeSpec, wall: Arc<dyn WallClock>, event_log_capacity: usize) -> Self {
        Self::new(
            NodeId::new(spec.id.clone()),
            spec.region.clone(),
            Duration::from_millis(spec.latency_ms),
            HybridClock::with_offset(wall, spec.clock_offset_ms),
            event_log_capacity,
        )
    }

    /// Returns node identifier.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Returns region name.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns simulated base latency of outbound messages.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Returns the node's clock.
    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    /// Returns every tracked package history.
    pub fn packages(&self) -> &BTreeMap<PackageId, Vec<EventRecord>> {
        &self.packages
    }

    /// Returns messages sent but not yet acknowledged as delivered.
    pub fn in_flight(&self) -> &[Message] {
        &self.in_flight
    }

    /// Returns the bounded event log.
    pub fn event_log(&self) -> &BoundedLog<LogEntry> {
        &self.event_log
    }

    /// Records a local observation and returns it for broadcasting.
    pub fn record_local_event(
        &mut self,
        package_id: PackageId,
        kind: EventKind,
        location: impl Into<String>,
    ) -> EventRecord {
        let timestamp = self.clock.tick();
        let record = EventRecord {
            package_id,
            kind,
            location: location.into(),
            timestamp,
            origin: self.id.clone(),
            region: self.region.clone(),
            is_remote: false,
        };

        tracing::trace!(
            node = %self.id,
            package = %record.package_id,
            kind = %record.kind,
            %timestamp,
            "Recorded local event"
        );

        self.packages
            .entry(record.package_id.clone())
            .or_default()
            .push(record.clone());
        self.event_log.push(LogEntry::Event(record.clone()));
        record
    }

    /// Stamps a message and hands it to the transport for delayed delivery.
    ///
    /// The message stays in the in-flight set until the network reports it
    /// delivered. Returns without waiting for delivery. A refused message
    /// leaves the clock and the in-flight set as they were.
    ///
    /// # Errors
    /// - `NetworkError::QueueOverflow` - Transport cannot accept more deliveries
    pub fn send(
        &mut self,
        message: Message,
        transport: &mut dyn Transport,
    ) -> Result<MessageId, NetworkError> {
        let mut clock = self.clock.clone();
        let timestamp = clock.tick();
        let message = message.stamped(timestamp, clock.wall_now());
        let id = message.id();

        transport.schedule(message.clone(), self.latency)?;
        self.clock = clock;
        self.in_flight.push(message);

        Ok(id)
    }

    /// Accepts a delivered message.
    ///
    /// Messages already received (by id) are ignored and reported as
    /// [`ReceiveOutcome::Duplicate`].
    ///
    /// # Errors
    /// - `NodeError::Misaddressed` - Message names a different receiver
    /// - `NodeError::MalformedPayload` - Package update lacks a required field
    pub fn receive(&mut self, message: Message) -> Result<ReceiveOutcome, NodeError> {
        if message.receiver() != Some(&self.id) {
            return Err(NodeError::Misaddressed {
                message_id: message.id(),
                addressed: message.receiver().cloned(),
                node: self.id.clone(),
            });
        }

        if self.seen.contains(&message.id()) {
            tracing::debug!(node = %self.id, message = %message.id(), "Ignoring duplicate delivery");
            return Ok(ReceiveOutcome::Duplicate);
        }

        if let MessageBody::PackageUpdate(update) = message.body() {
            if let Some(field) = update.missing_field() {
                return Err(NodeError::MalformedPayload {
                    message_id: message.id(),
                    field,
                });
            }
        }

        let remote = message.timestamp();
        let timestamp = self.clock.update(remote.physical, remote.logical);
        self.in_flight.retain(|pending| pending.id() != message.id());
        self.remember(message.id());

        let outcome = match message.body() {
            MessageBody::PackageUpdate(update) => {
                let record = EventRecord {
                    package_id: update.package_id.clone(),
                    kind: update.kind,
                    location: update.location.clone(),
                    timestamp,
                    origin: update.origin.clone(),
                    region: update.region.clone(),
                    is_remote: true,
                };
                self.packages
                    .entry(record.package_id.clone())
                    .or_default()
                    .push(record.clone());
                ReceiveOutcome::Applied(record)
            }
            MessageBody::SnapshotRequest(request_id) => ReceiveOutcome::SnapshotTaken {
                request_id: *request_id,
                snapshot: Box::new(self.initiate_snapshot()),
            },
            MessageBody::SnapshotResponse(report) => {
                ReceiveOutcome::SnapshotReported(report.clone())
            }
        };

        self.event_log.push(LogEntry::Receipt(ReceiptRecord {
            message_id: message.id(),
            kind: message.kind(),
            sender: message.sender().clone(),
            receiver: self.id.clone(),
            timestamp,
        }));

        Ok(outcome)
    }

    /// Removes a delivered message from the in-flight set.
    ///
    /// Returns false if the id was not in flight.
    pub fn acknowledge(&mut self, message_id: MessageId) -> bool {
        let before = self.in_flight.len();
        self.in_flight.retain(|pending| pending.id() != message_id);
        before != self.in_flight.len()
    }

    /// Captures an independent copy of packages and in-flight messages.
    ///
    /// State is copied first and the snapshot is stamped afterwards, so the
    /// copy reflects everything that happened before the stamp.
    pub fn initiate_snapshot(&mut self) -> LocalSnapshot {
        let packages = self.packages.clone();
        let in_flight = self.in_flight.clone();
        let event_count = self.event_log.len();
        let timestamp = self.clock.tick();

        LocalSnapshot {
            node_id: self.id.clone(),
            region: self.region.clone(),
            timestamp,
            packages,
            in_flight,
            event_count,
        }
    }

    /// Returns the stored history for one package in insertion order.
    pub fn history(&self, package_id: &str) -> &[EventRecord] {
        self.packages
            .get(package_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the last issued clock reading.
    pub fn current_timestamp(&self) -> ClockTimestamp {
        self.clock.current()
    }

    /// Clears packages, event log, in-flight set and de-duplication memory.
    ///
    /// The clock keeps running so readings stay monotonic across resets.
    pub fn reset(&mut self) {
        self.packages.clear();
        self.event_log.clear();
        self.in_flight.clear();
        self.seen.clear();
        self.seen_order.clear();
    }

    fn remember(&mut self, message_id: MessageId) {
        if self.seen_order.len() == DEDUP_WINDOW {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(message_id);
        self.seen_order.push_back(message_id);
    }
}
