//! Identifiers and records shared by nodes, the detector and snapshots.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{ClockTimestamp, HybridClock};
use crate::message::{MessageId, MessageKind};

/// Identifier of a regional tracking node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a tracked package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Creates a package id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for PackageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observed movement of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Departed,
    InTransit,
    Arrived,
}

impl EventKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [EventKind; 3] = [EventKind::Departed, EventKind::InTransit, EventKind::Arrived];

    /// Returns string representation of event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Departed => "DEPARTED",
            EventKind::InTransit => "IN_TRANSIT",
            EventKind::Arrived => "ARRIVED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "DEPARTED" => Ok(EventKind::Departed),
            "IN_TRANSIT" => Ok(EventKind::InTransit),
            "ARRIVED" => Ok(EventKind::Arrived),
            _ => Err(format!("Invalid event kind: {s}")),
        }
    }
}

/// A package observation held in a node's history.
///
/// Local records carry the observing node as origin. Remote records are
/// synthesized by the receiving node, keep the reporting node as origin and
/// carry the receiver's merged clock reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub package_id: PackageId,
    pub kind: EventKind,
    pub location: String,
    pub timestamp: ClockTimestamp,
    pub origin: NodeId,
    pub region: String,
    pub is_remote: bool,
}

impl EventRecord {
    /// Orders two records by the hybrid clock total order.
    pub fn causal_cmp(&self, other: &Self) -> Ordering {
        HybridClock::compare(&self.timestamp, &self.origin, &other.timestamp, &other.origin)
    }
}

/// Bookkeeping entry appended whenever a node accepts a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub message_id: MessageId,
    pub kind: MessageKind,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub timestamp: ClockTimestamp,
}

/// Entry of a node's bounded event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum LogEntry {
    Event(EventRecord),
    Receipt(ReceiptRecord),
}

impl LogEntry {
    /// Returns the clock reading attached to this entry.
    pub fn timestamp(&self) -> ClockTimestamp {
        match self {
            LogEntry::Event(record) => record.timestamp,
            LogEntry::Receipt(receipt) => receipt.timestamp,
        }
    }
}
