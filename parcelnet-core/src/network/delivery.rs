//! Scheduled delivery queue driven by a controllable wall clock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use super::NetworkError;
use crate::clock::WallClock;
use crate::message::Message;
use crate::rng::DeterministicRng;

/// Outbound side of the network as seen by a sending node.
pub trait Transport {
    /// Accepts a stamped message for delivery after `base_latency` plus jitter.
    ///
    /// # Errors
    /// - `NetworkError::QueueOverflow` - Too many deliveries pending
    fn schedule(&mut self, message: Message, base_latency: Duration) -> Result<(), NetworkError>;
}

/// A message waiting for its delivery time.
#[derive(Debug, Clone)]
pub struct ScheduledDelivery {
    /// Wall time in milliseconds at which the message becomes deliverable
    pub due_ms: u64,
    /// Sampled base latency plus jitter
    pub delay: Duration,
    /// Network generation the message was sent in
    pub generation: u64,
    /// The message itself
    pub message: Message,
    seq: u64,
}

impl Eq for ScheduledDelivery {}

impl PartialEq for ScheduledDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for ScheduledDelivery {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest due first, then scheduling order
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending deliveries.
///
/// Delays are `base_latency + uniform(0, jitter_max)`, sampled from a seeded
/// generator so a run with the same seed and wall clock replays exactly.
#[derive(Debug)]
pub struct DeliveryQueue {
    pending: BinaryHeap<ScheduledDelivery>,
    wall: Arc<dyn WallClock>,
    rng: DeterministicRng,
    jitter_max: Duration,
    max_pending: usize,
    next_seq: u64,
    generation: u64,
}

impl DeliveryQueue {
    /// Creates an empty queue.
    pub fn new(
        wall: Arc<dyn WallClock>,
        rng: DeterministicRng,
        jitter_max: Duration,
        max_pending: usize,
    ) -> Self {
        Self {
            pending: BinaryHeap::new(),
            wall,
            rng,
            jitter_max,
            max_pending,
            next_seq: 0,
            generation: 0,
        }
    }

    /// Returns current generation. Deliveries from older generations are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts a new generation, making every pending delivery stale.
    pub fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Returns current wall time of the queue's clock.
    pub fn now_ms(&self) -> u64 {
        self.wall.now_ms()
    }

    /// Removes the earliest delivery if it is due at `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<ScheduledDelivery> {
        if self.pending.peek()?.due_ms <= now_ms {
            self.pending.pop()
        } else {
            None
        }
    }

    /// Returns due time of the earliest pending delivery.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.pending.peek().map(|delivery| delivery.due_ms)
    }

    /// Returns number of pending deliveries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn sample_delay(&mut self, base_latency: Duration) -> Duration {
        base_latency.saturating_add(self.rng.jitter(self.jitter_max))
    }
}

impl Transport for DeliveryQueue {
    fn schedule(&mut self, message: Message, base_latency: Duration) -> Result<(), NetworkError> {
        if self.pending.len() >= self.max_pending {
            return Err(NetworkError::QueueOverflow {
                pending: self.pending.len(),
            });
        }

        let delay = self.sample_delay(base_latency);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let due_ms = self.wall.now_ms().saturating_add(delay_ms);

        tracing::trace!(
            message = %message.id(),
            kind = message.kind().as_str(),
            due_ms,
            "Scheduled delivery"
        );

        self.pending.push(ScheduledDelivery {
            due_ms,
            delay,
            generation: self.generation,
            message,
            seq: self.next_seq,
        });
        self.next_seq += 1;

        Ok(())
    }
}
