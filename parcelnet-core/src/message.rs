//! Message envelopes exchanged between nodes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::ClockTimestamp;
use crate::model::{EventKind, EventRecord, NodeId, PackageId};
use crate::snapshot::NodeSnapshotSummary;

/// Unique identifier of a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifier of one message-driven snapshot round.
///
/// Carried by the request and echoed in every response so a coordinator can
/// ignore answers to an earlier round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Discriminant of [`MessageBody`] for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    PackageUpdate,
    SnapshotRequest,
    SnapshotResponse,
}

impl MessageKind {
    /// Returns string representation of message kind for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PackageUpdate => "PACKAGE_UPDATE",
            MessageKind::SnapshotRequest => "SNAPSHOT_REQUEST",
            MessageKind::SnapshotResponse => "SNAPSHOT_RESPONSE",
        }
    }
}

/// Package observation reported to other nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpdate {
    pub package_id: PackageId,
    pub kind: EventKind,
    pub location: String,
    pub origin: NodeId,
    pub region: String,
    /// Reading of the origin's clock when the observation was made
    pub observed_at: ClockTimestamp,
}

impl PackageUpdate {
    /// Builds the update that reports a locally recorded event.
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            package_id: record.package_id.clone(),
            kind: record.kind,
            location: record.location.clone(),
            origin: record.origin.clone(),
            region: record.region.clone(),
            observed_at: record.timestamp,
        }
    }

    /// Returns the name of the first required field that is empty.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.package_id.as_str().trim().is_empty() {
            Some("package_id")
        } else if self.origin.as_str().trim().is_empty() {
            Some("origin")
        } else if self.location.trim().is_empty() {
            Some("location")
        } else {
            None
        }
    }
}

/// Local state a node reports back to a snapshot requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReport {
    /// Round this report answers
    pub request_id: SnapshotId,
    pub summary: NodeSnapshotSummary,
    pub in_flight: Vec<Message>,
}

/// Typed message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    PackageUpdate(PackageUpdate),
    SnapshotRequest(SnapshotId),
    SnapshotResponse(Box<SnapshotReport>),
}

impl MessageBody {
    /// Returns the discriminant of this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::PackageUpdate(_) => MessageKind::PackageUpdate,
            MessageBody::SnapshotRequest(_) => MessageKind::SnapshotRequest,
            MessageBody::SnapshotResponse(_) => MessageKind::SnapshotResponse,
        }
    }
}

/// Immutable message envelope.
///
/// Built unstamped by the sender; [`Node::send`](crate::Node::send) attaches
/// the clock reading and send time before the envelope leaves the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    body: MessageBody,
    sender: NodeId,
    receiver: Option<NodeId>,
    timestamp: ClockTimestamp,
    sent_at_wall: u64,
}

impl Message {
    /// Creates an unstamped message with a fresh id.
    ///
    /// A `None` receiver marks a broadcast template that only
    /// [`Network::broadcast`](crate::Network::broadcast) can fan out.
    pub fn new(body: MessageBody, sender: NodeId, receiver: Option<NodeId>) -> Self {
        Self {
            id: MessageId::generate(),
            body,
            sender,
            receiver,
            timestamp: ClockTimestamp::default(),
            sent_at_wall: 0,
        }
    }

    /// Creates an independent copy addressed to `receiver` with its own id.
    pub fn addressed_to(&self, receiver: NodeId) -> Self {
        Self::new(self.body.clone(), self.sender.clone(), Some(receiver))
    }

    pub(crate) fn stamped(mut self, timestamp: ClockTimestamp, sent_at_wall: u64) -> Self {
        self.timestamp = timestamp;
        self.sent_at_wall = sent_at_wall;
        self
    }

    /// Returns the envelope id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the typed payload.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Returns the payload discriminant.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Returns the sending node.
    pub fn sender(&self) -> &NodeId {
        &self.sender
    }

    /// Returns the addressed node, if any.
    pub fn receiver(&self) -> Option<&NodeId> {
        self.receiver.as_ref()
    }

    /// Returns the sender's clock reading at send time.
    pub fn timestamp(&self) -> ClockTimestamp {
        self.timestamp
    }

    /// Returns the sender's wall time at send time.
    pub fn sent_at_wall(&self) -> u64 {
        self.sent_at_wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> PackageUpdate {
        PackageUpdate {
            package_id: PackageId::from("P001"),
            kind: EventKind::Departed,
            location: "Europe-Hub-1".to_string(),
            origin: NodeId::from("EU-1"),
            region: "Europe".to_string(),
            observed_at: ClockTimestamp::new(1, 2),
        }
    }

    #[test]
    fn test_addressed_copy_gets_new_id() {
        let template = Message::new(
            MessageBody::PackageUpdate(update()),
            NodeId::from("EU-1"),
            None,
        );
        let copy = template.addressed_to(NodeId::from("US-1"));

        assert_ne!(copy.id(), template.id());
        assert_eq!(copy.receiver(), Some(&NodeId::from("US-1")));
        assert_eq!(copy.body(), template.body());
        assert_eq!(copy.sender(), template.sender());
    }

    #[test]
    fn test_missing_field_detection() {
        assert_eq!(update().missing_field(), None);

        let mut blank_package = update();
        blank_package.package_id = PackageId::from("  ");
        assert_eq!(blank_package.missing_field(), Some("package_id"));

        let mut blank_location = update();
        blank_location.location.clear();
        assert_eq!(blank_location.missing_field(), Some("location"));
    }

    #[test]
    fn test_body_serializes_with_type_tag() {
        let request_id = SnapshotId::generate();
        let body = MessageBody::SnapshotRequest(request_id);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["type"], "SNAPSHOT_REQUEST");
        assert_eq!(json["payload"], request_id.0.to_string());
        assert_eq!(body.kind().as_str(), "SNAPSHOT_REQUEST");
    }
}
