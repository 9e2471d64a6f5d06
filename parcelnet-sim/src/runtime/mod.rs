//! Actor runtime owning a simulation driver.
//!
//! The driver is moved into a spawned task; callers talk to it through a
//! cloneable [`SimulationHandle`].

mod actor;
mod commands;
mod handle;

pub use actor::spawn_simulation;
pub use commands::SimulationCommand;
pub use handle::SimulationHandle;
