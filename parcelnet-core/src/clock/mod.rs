//! Hybrid logical clocks and the wall-time sources behind them.

mod hlc;
mod wall;

pub use hlc::{ClockTimestamp, HybridClock};
pub use wall::{MAX_TIME_ADVANCE, ManualWallClock, SystemWallClock, WallClock};
