//! Fixed-capacity log with oldest-first eviction.

use std::collections::{VecDeque, vec_deque};

/// Append-only log that keeps at most `capacity` entries.
///
/// Pushing into a full log evicts the oldest entry. Iteration is oldest to
/// newest unless stated otherwise.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> BoundedLog<T> {
    /// Creates an empty log. A zero capacity is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    /// Appends an entry, returning the evicted oldest entry if the log was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Appends every entry in order.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, entries: I) {
        for entry in entries {
            self.push(entry);
        }
    }

    /// Returns number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns how many entries were evicted since creation or last clear.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.entries.iter()
    }

    /// Iterates newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().rev()
    }

    /// Iterates the most recent `count` entries, oldest to newest.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &T> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip)
    }

    /// Returns the newest entry.
    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Drops every entry and resets the eviction counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.evicted = 0;
    }
}

impl<'a, T> IntoIterator for &'a BoundedLog<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
