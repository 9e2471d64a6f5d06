//! Command definitions for the simulation actor.

use parcelnet_core::{Anomaly, EventRecord, NodeId};
use tokio::sync::oneshot;

use crate::driver::{
    CapturedSnapshot, SimulationError, SimulationReport, SimulationStatus, TimelineEntry,
};

/// Commands that can be sent to the simulation actor.
///
/// Each command carries a response channel. The actor owns the driver and
/// handles commands one at a time between ticks, so no driver state is
/// shared between tasks.
pub enum SimulationCommand {
    /// Start periodic stepping.
    Start {
        /// Receives the status after the command
        responder: oneshot::Sender<SimulationStatus>,
    },
    /// Suspend periodic stepping.
    Pause {
        /// Receives the status after the command
        responder: oneshot::Sender<SimulationStatus>,
    },
    /// Clear all node state and anomalies and stop stepping.
    Reset {
        /// Signalled once the reset is done
        responder: oneshot::Sender<()>,
    },
    /// Capture a synchronous global snapshot.
    Snapshot {
        /// Receives the snapshot and its diff against the previous one
        responder: oneshot::Sender<CapturedSnapshot>,
    },
    /// Start a message-driven snapshot from one node.
    RequestSnapshot {
        /// Node that snapshots itself and asks its peers
        initiator: NodeId,
        /// Receives number of requests sent
        responder: oneshot::Sender<Result<usize, SimulationError>>,
    },
    /// Get the most recent visible anomalies.
    RecentAnomalies {
        /// Maximum number of anomalies returned
        limit: usize,
        /// Receives anomalies, newest first
        responder: oneshot::Sender<Vec<Anomaly>>,
    },
    /// Get the combined timeline.
    Timeline {
        /// Receives the timeline built by the last step
        responder: oneshot::Sender<Vec<TimelineEntry>>,
    },
    /// Get one package's history across all nodes.
    PackageTimeline {
        /// Package to follow
        package_id: String,
        /// Receives the merged history in hybrid clock order
        responder: oneshot::Sender<Vec<EventRecord>>,
    },
    /// Get a report of the run so far.
    Report {
        /// Receives the report
        responder: oneshot::Sender<SimulationReport>,
    },
    /// Shutdown the actor gracefully.
    Shutdown {
        /// Signalled before the actor exits
        responder: oneshot::Sender<()>,
    },
}
