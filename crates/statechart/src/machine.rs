//! Machine handle and the consumer event loop.
//!
//! Exactly one dedicated thread mutates the configuration; everything the
//! handle offers producers goes through the event queue or other shared,
//! locked state. The graph is freely mutable until `start`, frozen behind an
//! `Arc` afterwards.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::context::Shared;
use crate::describe::GraphDescription;
use crate::error::{PostError, StructuralError};
use crate::execute::Interpreter;
use crate::graph::StateGraph;
use crate::queue::{Envelope, Take};

enum Slot<E> {
    Open(StateGraph<E>),
    Frozen(Arc<StateGraph<E>>),
}

/// Handle to a state machine: graph owner before start, thread-safe producer
/// interface afterwards.
pub struct StateMachine<E: Send + 'static> {
    shared: Arc<Shared<E>>,
    slot: Mutex<Slot<E>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + 'static> StateMachine<E> {
    pub fn new(graph: StateGraph<E>) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            slot: Mutex::new(Slot::Open(graph)),
            worker: Mutex::new(None),
        }
    }

    /// Mutate the graph while the machine has not started. Fails with
    /// [`StructuralError::Frozen`] afterwards.
    pub fn with_graph<R>(
        &self,
        f: impl FnOnce(&mut StateGraph<E>) -> R,
    ) -> Result<R, StructuralError> {
        let mut slot = self.slot.lock().expect("graph slot poisoned");
        match &mut *slot {
            Slot::Open(graph) => Ok(f(graph)),
            Slot::Frozen(_) => Err(StructuralError::Frozen),
        }
    }

    /// Validate the graph, freeze it, and spin up the consumer thread, which
    /// enters the initial configuration before processing events.
    pub fn start(&self) -> Result<(), StructuralError> {
        let mut slot = self.slot.lock().expect("graph slot poisoned");
        match &*slot {
            Slot::Frozen(_) => return Err(StructuralError::AlreadyStarted),
            Slot::Open(graph) => graph.validate()?,
        }
        let graph = match std::mem::replace(&mut *slot, Slot::Open(StateGraph::new())) {
            Slot::Open(graph) => Arc::new(graph),
            Slot::Frozen(_) => unreachable!("checked above while holding the lock"),
        };
        *slot = Slot::Frozen(Arc::clone(&graph));
        drop(slot);

        let interpreter = Interpreter::new(graph, Arc::clone(&self.shared));
        let handle = thread::spawn(move || run_loop(interpreter));
        *self.worker.lock().expect("worker slot poisoned") = Some(handle);
        Ok(())
    }

    /// Enqueue an event. Events post from any thread and are processed in
    /// posting order.
    pub fn post(&self, event: E) -> Result<(), PostError> {
        self.shared.queue.post(event)
    }

    /// Enqueue several events in order.
    pub fn post_all(&self, events: impl IntoIterator<Item = E>) -> Result<(), PostError> {
        for event in events {
            self.post(event)?;
        }
        Ok(())
    }

    /// Request shutdown: the current step finishes, every active state exits
    /// deepest-first, and the consumer thread ends. Later posts are rejected.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Wait for the consumer thread to finish. Returns whether shutdown
    /// completed within the timeout.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.shared.outcome.lock().expect("outcome lock poisoned");
        while !outcome.finished {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            outcome = self
                .shared
                .outcome_cv
                .wait_timeout(outcome, deadline - now)
                .expect("outcome lock poisoned")
                .0;
        }
        true
    }

    /// Wait until all posted events have been consumed and the machine is
    /// idle again. Returns whether it settled within the timeout.
    pub fn settle(&self, timeout: Duration) -> bool {
        self.shared.queue.settle(timeout)
    }

    /// Store an opaque value visible to guards and actions.
    pub fn assign<T: std::any::Any + Send>(&self, key: impl Into<String>, value: T) {
        self.shared.assign(key, value);
    }

    /// Fetch a clone of a stored value.
    pub fn lookup<T: std::any::Any + Clone>(&self, key: &str) -> Option<T> {
        self.shared.lookup(key)
    }

    /// Labels of the active configuration, outermost first. Snapshot taken at
    /// the end of the latest run-to-completion step.
    pub fn active_states(&self) -> Vec<String> {
        self.shared
            .snapshot
            .lock()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// Whether the consumer thread has finished.
    pub fn is_finished(&self) -> bool {
        self.shared
            .outcome
            .lock()
            .expect("outcome lock poisoned")
            .finished
    }

    /// Fatal structural condition that stopped the machine, if any.
    pub fn last_error(&self) -> Option<StructuralError> {
        self.shared
            .outcome
            .lock()
            .expect("outcome lock poisoned")
            .error
            .clone()
    }

    /// Renderer-facing description of the graph, available before and after
    /// start.
    pub fn describe(&self) -> GraphDescription {
        let slot = self.slot.lock().expect("graph slot poisoned");
        match &*slot {
            Slot::Open(graph) => graph.describe(),
            Slot::Frozen(graph) => graph.describe(),
        }
    }
}

impl<E: Send + 'static> Drop for StateMachine<E> {
    fn drop(&mut self) {
        self.shared.request_stop();
    }
}

fn run_loop<E: Send + 'static>(mut interpreter: Interpreter<E>) {
    let shared = Arc::clone(&interpreter.shared);
    let fatal = drive(&mut interpreter, &shared);
    // Graceful paths sweep the remaining states; termination and fatal
    // structural conditions skip the exit behaviors.
    if fatal.is_none() && !interpreter.run.terminated {
        interpreter.shutdown_sweep();
    }
    interpreter.publish_snapshot();
    shared.finish(fatal);
}

fn drive<E: Send + 'static>(
    interpreter: &mut Interpreter<E>,
    shared: &Shared<E>,
) -> Option<StructuralError> {
    if let Err(fault) = interpreter.enter_initial() {
        interpreter.run.terminated = true;
        return Some(fault);
    }
    interpreter.publish_snapshot();
    loop {
        if shared.stopping.load(Ordering::Acquire) || interpreter.run.terminated {
            return None;
        }
        let deadline = interpreter.next_timer_deadline();
        let outcome = match shared.queue.take(deadline) {
            Take::Event(Envelope::Stop) => return None,
            Take::Event(Envelope::External(event)) => interpreter.step_event(&event),
            Take::TimedOut => {
                let mut result = Ok(());
                for (vertex, stamp) in interpreter.due_timers() {
                    if interpreter.run.terminated {
                        break;
                    }
                    result = interpreter.step_timeout(vertex, stamp);
                    if result.is_err() {
                        break;
                    }
                }
                result
            }
        };
        if let Err(fault) = outcome {
            interpreter.run.terminated = true;
            return Some(fault);
        }
        interpreter.publish_snapshot();
    }
}
