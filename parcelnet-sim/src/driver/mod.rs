//! Step driver for the tracking simulation.
//!
//! The driver owns the network, the anomaly detector and the snapshot
//! coordinator, and advances them together one step at a time.

mod simulation;
mod state;

pub use simulation::{
    CapturedSnapshot, DETERMINISTIC_EPOCH_MS, SimulationDriver, SimulationError, SimulationReport,
    StepOutcome,
};
pub use state::{SimulationMetrics, SimulationStatus, TimelineEntry};
