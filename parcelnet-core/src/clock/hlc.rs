//! Hybrid logical clock.
//!
//! The logical component tracks the largest physical reading or remote
//! logical value seen so far plus one, which gives every node a strictly
//! increasing counter that is causally merged on receipt and stays in the
//! same unit (milliseconds) as wall time.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::wall::WallClock;
use crate::model::NodeId;

/// A single reading of a node's hybrid logical clock.
///
/// Ordered by logical value first, then physical. Ties between readings of
/// different nodes are broken by origin with [`HybridClock::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClockTimestamp {
    /// Wall time in milliseconds at the moment of the reading
    pub physical: u64,
    /// Causality counter
    pub logical: u64,
}

impl ClockTimestamp {
    /// Creates a timestamp from raw components.
    pub fn new(physical: u64, logical: u64) -> Self {
        Self { physical, logical }
    }
}

impl Ord for ClockTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.logical
            .cmp(&other.logical)
            .then(self.physical.cmp(&other.physical))
    }
}

impl PartialOrd for ClockTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ClockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.physical, self.logical)
    }
}

/// Per-node hybrid logical clock.
///
/// Every reading comes from [`tick`](Self::tick) or
/// [`update`](Self::update). Both are synchronous and infallible.
#[derive(Debug, Clone)]
pub struct HybridClock {
    physical: u64,
    logical: u64,
    offset_ms: i64,
    wall: Arc<dyn WallClock>,
}

impl HybridClock {
    /// Creates a clock reading the given wall source without skew.
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self::with_offset(wall, 0)
    }

    /// Creates a clock whose physical readings are shifted by `offset_ms`.
    ///
    /// Used to model regional nodes whose wall clocks disagree.
    pub fn with_offset(wall: Arc<dyn WallClock>, offset_ms: i64) -> Self {
        Self {
            physical: 0,
            logical: 0,
            offset_ms,
            wall,
        }
    }

    /// Returns the skew applied to this clock's physical readings.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Returns the node's view of wall time, including its skew.
    pub fn wall_now(&self) -> u64 {
        self.wall.now_ms().saturating_add_signed(self.offset_ms)
    }

    /// Returns the last issued reading without advancing the clock.
    pub fn current(&self) -> ClockTimestamp {
        ClockTimestamp::new(self.physical, self.logical)
    }

    /// Issues a timestamp for a local event or send.
    ///
    /// The logical value is strictly greater than every value this clock
    /// issued before, even if wall time moved backwards.
    pub fn tick(&mut self) -> ClockTimestamp {
        let now = self.wall_now();
        self.physical = now;
        self.logical = self.logical.max(now) + 1;
        self.current()
    }

    /// Merges a remote reading and issues a timestamp ordered after it.
    ///
    /// Remote physical time does not feed the counter; a far-future remote
    /// wall clock only influences us through its logical value.
    pub fn update(&mut self, remote_physical: u64, remote_logical: u64) -> ClockTimestamp {
        let now = self.wall_now();
        if remote_physical > now {
            tracing::trace!(
                remote_physical,
                local_physical = now,
                "Merging remote reading ahead of local wall time"
            );
        }
        self.physical = now;
        self.logical = self.logical.max(now).max(remote_logical) + 1;
        self.current()
    }

    /// Total order over readings from any nodes.
    ///
    /// Logical ascending, then physical ascending, then origin node id.
    pub fn compare(
        a: &ClockTimestamp,
        a_origin: &NodeId,
        b: &ClockTimestamp,
        b_origin: &NodeId,
    ) -> Ordering {
        a.cmp(b).then_with(|| a_origin.cmp(b_origin))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::clock::ManualWallClock;

    fn manual_clock(start_ms: u64) -> (ManualWallClock, HybridClock) {
        let wall = ManualWallClock::starting_at(start_ms);
        let clock = HybridClock::new(Arc::new(wall.clone()));
        (wall, clock)
    }

    #[test]
    fn test_tick_tracks_wall_time() {
        let (wall, mut clock) = manual_clock(1_000);

        let first = clock.tick();
        assert_eq!(first, ClockTimestamp::new(1_000, 1_001));

        wall.set(5_000);
        let second = clock.tick();
        assert_eq!(second, ClockTimestamp::new(5_000, 5_001));
    }

    #[test]
    fn test_tick_survives_wall_regression() {
        let (wall, mut clock) = manual_clock(10_000);
        let before = clock.tick();

        wall.set(2_000);
        let after = clock.tick();

        assert_eq!(after.physical, 2_000);
        assert_eq!(after.logical, before.logical + 1);
    }

    #[test]
    fn test_update_orders_after_remote() {
        let (_wall, mut clock) = manual_clock(1_000);
        clock.tick();

        let merged = clock.update(90_000, 90_500);
        assert_eq!(merged.physical, 1_000);
        assert_eq!(merged.logical, 90_501);

        let next = clock.tick();
        assert!(next.logical > merged.logical);
    }

    #[test]
    fn test_offset_skews_physical_reading() {
        let wall = ManualWallClock::starting_at(20_000);
        let mut ahead = HybridClock::with_offset(Arc::new(wall.clone()), 15_000);
        let mut behind = HybridClock::with_offset(Arc::new(wall), -25_000);

        assert_eq!(ahead.tick().physical, 35_000);
        // Saturates at zero instead of wrapping.
        assert_eq!(behind.tick().physical, 0);
    }

    #[test]
    fn test_compare_breaks_ties_by_origin() {
        let ts = ClockTimestamp::new(100, 7);
        let a = NodeId::from("EU-1");
        let b = NodeId::from("US-1");

        assert_eq!(HybridClock::compare(&ts, &a, &ts, &b), Ordering::Less);
        assert_eq!(HybridClock::compare(&ts, &b, &ts, &a), Ordering::Greater);
        assert_eq!(HybridClock::compare(&ts, &a, &ts, &a), Ordering::Equal);
    }

    #[test]
    fn test_compare_logical_before_physical() {
        let early_logical = ClockTimestamp::new(9_000, 5);
        let late_logical = ClockTimestamp::new(1, 6);
        let origin = NodeId::from("N1");

        assert_eq!(
            HybridClock::compare(&early_logical, &origin, &late_logical, &origin),
            Ordering::Less
        );
    }

    fn reading() -> impl Strategy<Value = (ClockTimestamp, NodeId)> {
        (0u64..50, 0u64..50, 0usize..3).prop_map(|(physical, logical, node)| {
            (
                ClockTimestamp::new(physical, logical),
                NodeId::from(["A", "B", "C"][node]),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_tick_logical_strictly_increasing(walls in proptest::collection::vec(0u64..1_000_000, 1..64)) {
            let (wall, mut clock) = manual_clock(0);
            let mut previous = clock.current().logical;
            for reading in walls {
                wall.set(reading);
                let ts = clock.tick();
                prop_assert!(ts.logical > previous);
                previous = ts.logical;
            }
        }

        #[test]
        fn prop_update_dominates_previous_and_remote(
            start in 0u64..1_000_000,
            local_ticks in 0usize..8,
            remote_physical in 0u64..2_000_000,
            remote_logical in 0u64..2_000_000,
        ) {
            let (_wall, mut clock) = manual_clock(start);
            for _ in 0..local_ticks {
                clock.tick();
            }
            let previous = clock.current().logical;
            let merged = clock.update(remote_physical, remote_logical);
            prop_assert!(merged.logical >= previous.max(remote_logical) + 1);
        }

        #[test]
        fn prop_compare_is_strict_total_order(a in reading(), b in reading(), c in reading()) {
            let ab = HybridClock::compare(&a.0, &a.1, &b.0, &b.1);
            let ba = HybridClock::compare(&b.0, &b.1, &a.0, &a.1);
            prop_assert_eq!(ab, ba.reverse());

            if a != b {
                prop_assert_ne!(ab, Ordering::Equal);
            } else {
                prop_assert_eq!(ab, Ordering::Equal);
            }

            let bc = HybridClock::compare(&b.0, &b.1, &c.0, &c.1);
            if ab == Ordering::Less && bc == Ordering::Less {
                prop_assert_eq!(HybridClock::compare(&a.0, &a.1, &c.0, &c.1), Ordering::Less);
            }
        }
    }
}
