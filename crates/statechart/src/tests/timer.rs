use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::graph::VertexId;
use crate::timer::TimerQueue;

#[test]
fn earliest_live_deadline_wins() {
    let mut timers = TimerQueue::new();
    let now = Instant::now();
    let (a, b) = (VertexId(1), VertexId(2));
    let stamps: HashMap<_, _> = [(a, 0u64), (b, 1u64)].into_iter().collect();
    timers.arm(a, 0, now + Duration::from_millis(80));
    timers.arm(b, 1, now + Duration::from_millis(30));
    assert_eq!(timers.next_deadline(&stamps), Some(now + Duration::from_millis(30)));
}

#[test]
fn stale_stamps_are_skipped() {
    let mut timers = TimerQueue::new();
    let now = Instant::now();
    let v = VertexId(1);
    timers.arm(v, 0, now + Duration::from_millis(10));
    // The state was re-entered: only stamp 1 is live.
    let stamps: HashMap<_, _> = [(v, 1u64)].into_iter().collect();
    assert_eq!(timers.next_deadline(&stamps), None);
    assert!(timers.pop_due(now + Duration::from_secs(1), &stamps).is_empty());
}

#[test]
fn due_timers_pop_in_deadline_order() {
    let mut timers = TimerQueue::new();
    let now = Instant::now();
    let (a, b) = (VertexId(1), VertexId(2));
    let stamps: HashMap<_, _> = [(a, 0u64), (b, 1u64)].into_iter().collect();
    timers.arm(a, 0, now + Duration::from_millis(5));
    timers.arm(b, 1, now + Duration::from_millis(2));
    let due = timers.pop_due(now + Duration::from_millis(10), &stamps);
    assert_eq!(due, vec![(b, 1), (a, 0)]);
    assert_eq!(timers.next_deadline(&stamps), None);
}

#[test]
fn disarmed_vertex_never_fires() {
    let mut timers = TimerQueue::new();
    let now = Instant::now();
    let v = VertexId(3);
    timers.arm(v, 4, now);
    let stamps: HashMap<VertexId, u64> = HashMap::new();
    assert!(timers.pop_due(now + Duration::from_millis(1), &stamps).is_empty());
}
