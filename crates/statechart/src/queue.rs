//! Unbounded FIFO event queue with condition signalling.
//!
//! Producers append from any thread; the single consumer pops with an
//! optional deadline so timed events can wake it. `settle` lets callers wait
//! until the machine has drained all available input.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::PostError;

/// Queue element: an externally posted event or the shutdown sentinel.
pub(crate) enum Envelope<E> {
    External(E),
    Stop,
}

struct Inner<E> {
    queue: VecDeque<Envelope<E>>,
    closed: bool,
    waiting: bool,
}

/// Result of a consumer pop.
pub(crate) enum Take<E> {
    Event(Envelope<E>),
    TimedOut,
}

pub(crate) struct EventQueue<E> {
    inner: Mutex<Inner<E>>,
    avail: Condvar,
    settled: Condvar,
}

impl<E> EventQueue<E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
                waiting: false,
            }),
            avail: Condvar::new(),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().expect("event queue mutex poisoned")
    }

    /// Append an event. Never blocks beyond the queue mutex.
    pub(crate) fn post(&self, event: E) -> Result<(), PostError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(PostError::Closed);
        }
        inner.queue.push_back(Envelope::External(event));
        self.avail.notify_one();
        Ok(())
    }

    /// Close the queue for producers and wake the consumer with a sentinel.
    pub(crate) fn push_sentinel(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.queue.push_back(Envelope::Stop);
        self.avail.notify_all();
    }

    /// Close the queue for producers without waking the consumer.
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.settled.notify_all();
    }

    /// Pop the next event, blocking until one arrives or `deadline` passes.
    pub(crate) fn take(&self, deadline: Option<Instant>) -> Take<E> {
        let mut inner = self.lock();
        loop {
            if let Some(envelope) = inner.queue.pop_front() {
                return Take::Event(envelope);
            }
            // Queue drained: the machine is settled until something arrives.
            inner.waiting = true;
            self.settled.notify_all();
            let wake = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        inner.waiting = false;
                        return Take::TimedOut;
                    }
                    self.avail
                        .wait_timeout(inner, d - now)
                        .expect("event queue mutex poisoned")
                        .0
                }
                None => self.avail.wait(inner).expect("event queue mutex poisoned"),
            };
            inner = wake;
            inner.waiting = false;
        }
    }

    /// Wait until the queue is empty and the consumer is blocked on it, or
    /// until `timeout` elapses. Returns whether the queue settled.
    pub(crate) fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.queue.is_empty() && (inner.waiting || inner.closed) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return inner.queue.is_empty() && (inner.waiting || inner.closed);
            }
            inner = self
                .settled
                .wait_timeout(inner, deadline - now)
                .expect("event queue mutex poisoned")
                .0;
        }
    }
}
