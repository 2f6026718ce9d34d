//! One-shot timeout scheduling for timed states.
//!
//! Arming happens when a timed state is entered; each armed timer carries the
//! entry stamp of that state so a timer that fires after the state was left
//! (or re-entered) is recognized as stale and dropped. Disarming is lazy: the
//! heap keeps the entry, the stamp table no longer matches it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::graph::VertexId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) vertex: VertexId,
    pub(crate) stamp: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.stamp.cmp(&other.stamp))
            .then(self.vertex.cmp(&other.vertex))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of armed timers keyed by deadline.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn arm(&mut self, vertex: VertexId, stamp: u64, deadline: Instant) {
        self.heap.push(Reverse(TimerEntry {
            deadline,
            vertex,
            stamp,
        }));
    }

    fn is_live(entry: &TimerEntry, stamps: &HashMap<VertexId, u64>) -> bool {
        stamps.get(&entry.vertex) == Some(&entry.stamp)
    }

    /// Earliest deadline among still-live timers; stale heads are discarded.
    pub(crate) fn next_deadline(&mut self, stamps: &HashMap<VertexId, u64>) -> Option<Instant> {
        while let Some(Reverse(head)) = self.heap.peek() {
            if Self::is_live(head, stamps) {
                return Some(head.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every live timer whose deadline has passed.
    pub(crate) fn pop_due(
        &mut self,
        now: Instant,
        stamps: &HashMap<VertexId, u64>,
    ) -> Vec<(VertexId, u64)> {
        let mut due = Vec::new();
        while let Some(&Reverse(head)) = self.heap.peek() {
            if head.deadline > now {
                break;
            }
            self.heap.pop();
            if Self::is_live(&head, stamps) {
                due.push((head.vertex, head.stamp));
            }
        }
        due
    }
}
