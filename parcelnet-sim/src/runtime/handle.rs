//! Handle for communicating with the simulation actor.

use parcelnet_core::{Anomaly, EventRecord, NodeId};
use tokio::sync::{mpsc, oneshot};

use super::commands::SimulationCommand;
use crate::driver::{
    CapturedSnapshot, SimulationError, SimulationReport, SimulationStatus, TimelineEntry,
};

/// Handle for communicating with the simulation actor.
///
/// Cheap to clone; every clone talks to the same actor. Once the actor has
/// stopped every call fails with `SimulationError::DriverShutdown`.
#[derive(Clone)]
pub struct SimulationHandle {
    sender: mpsc::Sender<SimulationCommand>,
}

impl SimulationHandle {
    /// Creates a new handle with the given command sender.
    pub fn new(sender: mpsc::Sender<SimulationCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SimulationCommand,
    ) -> Result<T, SimulationError> {
        let (responder, rx) = oneshot::channel();

        self.sender
            .send(build(responder))
            .await
            .map_err(|_| SimulationError::DriverShutdown)?;

        rx.await.map_err(|_| SimulationError::DriverShutdown)
    }

    /// Starts periodic stepping and returns the new status.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn start(&self) -> Result<SimulationStatus, SimulationError> {
        self.request(|responder| SimulationCommand::Start { responder })
            .await
    }

    /// Suspends periodic stepping and returns the new status.
    ///
    /// Scheduled deliveries keep arriving while paused.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn pause(&self) -> Result<SimulationStatus, SimulationError> {
        self.request(|responder| SimulationCommand::Pause { responder })
            .await
    }

    /// Clears node state and anomalies and stops stepping.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn reset(&self) -> Result<(), SimulationError> {
        self.request(|responder| SimulationCommand::Reset { responder })
            .await
    }

    /// Captures a synchronous global snapshot.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn snapshot(&self) -> Result<CapturedSnapshot, SimulationError> {
        self.request(|responder| SimulationCommand::Snapshot { responder })
            .await
    }

    /// Starts a message-driven snapshot and returns number of requests sent.
    ///
    /// # Errors
    /// - `SimulationError::Network` - Unknown initiator or queue overflow
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn request_snapshot(&self, initiator: NodeId) -> Result<usize, SimulationError> {
        self.request(|responder| SimulationCommand::RequestSnapshot {
            initiator,
            responder,
        })
        .await?
    }

    /// Gets up to `limit` visible anomalies, newest first.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn recent_anomalies(&self, limit: usize) -> Result<Vec<Anomaly>, SimulationError> {
        self.request(|responder| SimulationCommand::RecentAnomalies { limit, responder })
            .await
    }

    /// Gets the combined timeline built by the last step.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn timeline(&self) -> Result<Vec<TimelineEntry>, SimulationError> {
        self.request(|responder| SimulationCommand::Timeline { responder })
            .await
    }

    /// Gets one package's history across all nodes in hybrid clock order.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn package_timeline(
        &self,
        package_id: &str,
    ) -> Result<Vec<EventRecord>, SimulationError> {
        self.request(|responder| SimulationCommand::PackageTimeline {
            package_id: package_id.to_string(),
            responder,
        })
        .await
    }

    /// Gets a report of the run so far.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor no longer running
    pub async fn report(&self) -> Result<SimulationReport, SimulationError> {
        self.request(|responder| SimulationCommand::Report { responder })
            .await
    }

    /// Stops the actor.
    ///
    /// # Errors
    /// - `SimulationError::DriverShutdown` - Actor already stopped
    pub async fn shutdown(&self) -> Result<(), SimulationError> {
        self.request(|responder| SimulationCommand::Shutdown { responder })
            .await
    }
}
