//! Wall-clock sources feeding the hybrid logical clocks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum time that can be advanced in a single operation (24 hours).
pub const MAX_TIME_ADVANCE: Duration = Duration::from_secs(86400);

/// Source of physical time in milliseconds.
///
/// Nodes, the delivery queue and the anomaly detector all read time through
/// this trait so a simulation can swap real time for a controllable clock.
pub trait WallClock: Send + Sync + fmt::Debug {
    /// Returns current wall time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by the operating system's UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Virtual wall clock for deterministic simulation and tests.
///
/// Clones share the same underlying time, so the driver can hold one handle
/// while nodes and the delivery queue read through others. Time only moves
/// when advanced explicitly.
#[derive(Debug, Clone, Default)]
pub struct ManualWallClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualWallClock {
    /// Creates a manual clock starting at the given millisecond reading.
    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advances virtual time by the given duration.
    ///
    /// # Panics
    ///
    /// Panics if duration exceeds 24 hours ([`MAX_TIME_ADVANCE`]). Callers
    /// holding untrusted durations check the limit first.
    pub fn advance(&self, duration: Duration) {
        assert!(
            duration <= MAX_TIME_ADVANCE,
            "Cannot advance time by more than 24 hours"
        );
        self.now_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets virtual time to an absolute reading.
    ///
    /// Unlike [`advance`](Self::advance) this may move time backwards, which
    /// is how tests model a wall clock regression.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl WallClock for ManualWallClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
