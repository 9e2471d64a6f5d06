//! Actor loop driving the simulation on a fixed period.

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use super::commands::SimulationCommand;
use super::handle::SimulationHandle;
use crate::driver::SimulationDriver;

/// Spawns the simulation actor and returns its handle.
///
/// The actor owns the driver. It ticks once per step period (delivering due
/// messages and stepping when running) and handles commands in between, one
/// at a time. Must be called from within a tokio runtime.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use parcelnet_core::ParcelnetConfig;
/// use parcelnet_sim::{SimulationDriver, spawn_simulation};
///
/// let driver = SimulationDriver::deterministic(ParcelnetConfig::for_testing()).unwrap();
/// let handle = spawn_simulation(driver);
/// handle.start().await.unwrap();
/// # }
/// ```
pub fn spawn_simulation(driver: SimulationDriver) -> SimulationHandle {
    let (sender, receiver) = mpsc::channel(100);

    tokio::spawn(async move {
        run_actor_loop(driver, receiver).await;
    });

    SimulationHandle::new(sender)
}

/// Runs the main actor loop until shutdown or until every handle is dropped.
async fn run_actor_loop(
    mut driver: SimulationDriver,
    mut receiver: mpsc::Receiver<SimulationCommand>,
) {
    tracing::debug!("Simulation actor started");

    let mut interval = time::interval(driver.step_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else { break };
                if !handle_command(&mut driver, command) {
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(error) = driver.tick() {
                    tracing::warn!(%error, "Simulation tick failed");
                }
            }
        }
    }

    tracing::debug!("Simulation actor stopped");
}

/// Handles a single command.
/// Returns true to continue processing, false to shutdown.
fn handle_command(driver: &mut SimulationDriver, command: SimulationCommand) -> bool {
    match command {
        SimulationCommand::Start { responder } => {
            driver.start();
            let _ = responder.send(driver.status());
        }

        SimulationCommand::Pause { responder } => {
            driver.pause();
            let _ = responder.send(driver.status());
        }

        SimulationCommand::Reset { responder } => {
            driver.reset();
            let _ = responder.send(());
        }

        SimulationCommand::Snapshot { responder } => {
            let _ = responder.send(driver.capture_snapshot());
        }

        SimulationCommand::RequestSnapshot {
            initiator,
            responder,
        } => {
            let _ = responder.send(driver.request_snapshot(&initiator));
        }

        SimulationCommand::RecentAnomalies { limit, responder } => {
            let _ = responder.send(driver.recent_anomalies(limit));
        }

        SimulationCommand::Timeline { responder } => {
            let _ = responder.send(driver.timeline().to_vec());
        }

        SimulationCommand::PackageTimeline {
            package_id,
            responder,
        } => {
            let _ = responder.send(driver.package_timeline(&package_id));
        }

        SimulationCommand::Report { responder } => {
            let _ = responder.send(driver.report());
        }

        SimulationCommand::Shutdown { responder } => {
            tracing::debug!("Simulation actor shutting down");
            let _ = responder.send(());
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parcelnet_core::ParcelnetConfig;

    use super::*;
    use crate::driver::{SimulationError, SimulationStatus};

    fn handle() -> SimulationHandle {
        let driver = SimulationDriver::deterministic(ParcelnetConfig::for_testing()).unwrap();
        spawn_simulation(driver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_actor_steps_on_interval() {
        let handle = handle();

        assert_eq!(handle.start().await.unwrap(), SimulationStatus::Running);
        time::sleep(Duration::from_millis(5_500)).await;

        let report = handle.report().await.unwrap();
        assert!(report.metrics.steps >= 4);
        assert_eq!(report.status, SimulationStatus::Running);
        assert!(!handle.timeline().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_steps() {
        let handle = handle();
        handle.start().await.unwrap();
        time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(handle.pause().await.unwrap(), SimulationStatus::Paused);
        let paused_at = handle.report().await.unwrap().metrics.steps;
        time::sleep(Duration::from_millis(5_000)).await;

        let report = handle.report().await.unwrap();
        assert_eq!(report.metrics.steps, paused_at);
        // Deliveries kept flowing while paused
        assert_eq!(report.pending_deliveries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_state() {
        let handle = handle();
        handle.start().await.unwrap();
        time::sleep(Duration::from_millis(3_500)).await;

        handle.reset().await.unwrap();

        let report = handle.report().await.unwrap();
        assert_eq!(report.status, SimulationStatus::Idle);
        assert_eq!(report.metrics.steps, 0);
        assert!(handle.recent_anomalies(10).await.unwrap().is_empty());
        assert!(handle.package_timeline("P001").await.unwrap().is_empty());
        assert!(handle.snapshot().await.unwrap().snapshot.latest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_handle() {
        let handle = handle();

        handle.shutdown().await.unwrap();

        assert!(matches!(
            handle.report().await,
            Err(SimulationError::DriverShutdown)
        ));
    }
}
