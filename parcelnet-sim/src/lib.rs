//! Parcelnet Simulation - Deterministic and live runs of the tracking network.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! This crate drives a network of regional tracking nodes: it generates
//! random package events, lets the network deliver them with simulated
//! latency, scans for anomalies after every step and captures global
//! snapshots on demand.
//!
//! # Example
//!
//! ```rust,no_run
//! use parcelnet_core::ParcelnetConfig;
//! use parcelnet_sim::SimulationDriver;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = SimulationDriver::deterministic(ParcelnetConfig::for_testing())?;
//! let report = driver.run_steps(30)?;
//! println!("{}", report.summary());
//!
//! let captured = driver.capture_snapshot();
//! println!("{} packages tracked", captured.snapshot.total_packages());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Driver**: synchronous stepper owning network, detector and coordinator
//! - **Runtime**: tokio actor ticking the driver on its step period
//! - **Scenarios**: canned topologies and a forced-anomaly run

pub mod driver;
pub mod runtime;
pub mod scenarios;

pub use driver::{
    CapturedSnapshot, SimulationDriver, SimulationError, SimulationMetrics, SimulationReport,
    SimulationStatus, StepOutcome, TimelineEntry,
};
pub use runtime::{SimulationHandle, spawn_simulation};
pub use scenarios::{ForcedAnomalyScenario, ScenarioOutcome};
