//! Parcelnet Core - Causally ordered package tracking across regional nodes
//!
//! This crate provides the building blocks of the tracking network: hybrid
//! logical clocks, message envelopes, nodes and the router that connects
//! them, global snapshots, anomaly detection and configuration.

pub mod anomaly;
pub mod clock;
pub mod config;
pub mod message;
pub mod model;
pub mod network;
pub mod node;
pub mod ring_buffer;
pub mod rng;
pub mod snapshot;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use anomaly::{Anomaly, AnomalyDetector, AnomalyKind, PackageHistories, Severity};
pub use clock::{ClockTimestamp, HybridClock, ManualWallClock, SystemWallClock, WallClock};
pub use config::{AnomalyConfig, ConfigError, NetworkConfig, NodeSpec, ParcelnetConfig};
pub use message::{
    Message, MessageBody, MessageId, MessageKind, PackageUpdate, SnapshotId, SnapshotReport,
};
pub use model::{EventKind, EventRecord, LogEntry, NodeId, PackageId, ReceiptRecord};
pub use network::{
    ArrivalDrift, DeliveryOutcome, Network, NetworkError, NetworkStats, RegionDriftSummary,
    RegionSummary,
};
pub use node::{Node, NodeError, ReceiveOutcome};
pub use ring_buffer::BoundedLog;
pub use rng::DeterministicRng;
pub use snapshot::{
    GlobalSnapshot, HierarchicalSnapshot, LocalSnapshot, RegionSnapshot, SnapshotCoordinator,
    SnapshotDiff,
};

/// Core errors that can bubble up from any Parcelnet subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ParcelnetError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParcelnetError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ParcelnetError::Node(NodeError::MalformedPayload { field, .. }) => {
                format!("A package update was missing its {field}")
            }
            ParcelnetError::Node(_) => "A message reached the wrong node".to_string(),
            ParcelnetError::Network(NetworkError::UnknownNode { node_id }) => {
                format!("Node {node_id} is not part of the network")
            }
            ParcelnetError::Network(_) => "Message delivery failed".to_string(),
            ParcelnetError::Config(e) => format!("Invalid configuration: {e}"),
            ParcelnetError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ParcelnetError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, ParcelnetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let error = ParcelnetError::from(NetworkError::UnknownNode {
            node_id: NodeId::from("GHOST"),
        });
        assert_eq!(error.user_message(), "Node GHOST is not part of the network");
        assert!(!error.is_user_error());

        let error = ParcelnetError::from(ConfigError::DuplicateNode {
            id: "EU-1".to_string(),
        });
        assert!(error.is_user_error());
    }
}
