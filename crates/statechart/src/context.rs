//! Execution context handed to user hooks, and the state shared between the
//! machine handle and its consumer thread.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{HookError, PostError, StructuralError};
use crate::queue::EventQueue;

/// Entry/exit behavior of a state.
pub type StateHook<E> = Arc<dyn Fn(&MachineContext<E>) -> Result<(), HookError> + Send + Sync>;

/// Guard predicate of a transition. Receives the triggering event, or `None`
/// for completion-triggered and synthetic dispatches.
pub type GuardFn<E> =
    Arc<dyn Fn(&MachineContext<E>, Option<&E>) -> Result<bool, HookError> + Send + Sync>;

/// Effect of a transition.
pub type ActionFn<E> =
    Arc<dyn Fn(&MachineContext<E>, Option<&E>) -> Result<(), HookError> + Send + Sync>;

/// Trigger predicate over posted events.
pub type TriggerFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Do-activity of a state. Started after the entry behavior; the token is
/// cancelled when the state exits. The hook must not block the consumer
/// thread: long-running work belongs on a thread of its own, polling the
/// token.
pub type DoHookFn<E> = Arc<dyn Fn(&MachineContext<E>, DoToken) -> Result<(), HookError> + Send + Sync>;

/// Cancellation token for a do-activity.
#[derive(Debug, Clone, Default)]
pub struct DoToken {
    cancelled: Arc<AtomicBool>,
}

impl DoToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Terminal outcome of the consumer thread.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) finished: bool,
    pub(crate) error: Option<StructuralError>,
}

/// State shared between the machine handle and the consumer thread.
///
/// The event queue is the producer/consumer synchronization point. The
/// variable store backs `assign`/`lookup`; guards and actions access it from
/// the consumer thread only, the handle may inspect it from anywhere.
pub(crate) struct Shared<E> {
    pub(crate) queue: EventQueue<E>,
    vars: Mutex<HashMap<String, Box<dyn Any + Send>>>,
    pub(crate) stopping: AtomicBool,
    pub(crate) outcome: Mutex<Outcome>,
    pub(crate) outcome_cv: Condvar,
    pub(crate) snapshot: Mutex<Vec<String>>,
}

impl<E> Shared<E> {
    pub(crate) fn new() -> Self {
        Self {
            queue: EventQueue::new(),
            vars: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            outcome: Mutex::new(Outcome::default()),
            outcome_cv: Condvar::new(),
            snapshot: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn assign<T: Any + Send>(&self, key: impl Into<String>, value: T) {
        let mut vars = self.vars.lock().expect("variable store poisoned");
        vars.insert(key.into(), Box::new(value));
    }

    pub(crate) fn lookup<T: Any + Clone>(&self, key: &str) -> Option<T> {
        let vars = self.vars.lock().expect("variable store poisoned");
        vars.get(key).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.queue.push_sentinel();
    }

    pub(crate) fn finish(&self, error: Option<StructuralError>) {
        self.queue.close();
        let mut outcome = self.outcome.lock().expect("outcome lock poisoned");
        outcome.finished = true;
        if outcome.error.is_none() {
            outcome.error = error;
        }
        self.outcome_cv.notify_all();
    }
}

/// Machine context handed to guards, actions, entry/exit behaviors and
/// do-activities.
///
/// Hooks run on the consumer thread; the context never exposes the
/// configuration itself, only the opaque variable store and event posting.
pub struct MachineContext<'a, E> {
    shared: &'a Shared<E>,
}

impl<'a, E> MachineContext<'a, E> {
    pub(crate) fn new(shared: &'a Shared<E>) -> Self {
        Self { shared }
    }

    /// Store an opaque value under `key`, replacing any previous value.
    pub fn assign<T: Any + Send>(&self, key: impl Into<String>, value: T) {
        self.shared.assign(key, value);
    }

    /// Fetch a clone of the value stored under `key`, if it exists and has
    /// the requested type.
    pub fn lookup<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.shared.lookup(key)
    }

    /// Enqueue an event behind everything already posted.
    pub fn post(&self, event: E) -> Result<(), PostError> {
        self.shared.queue.post(event)
    }

    /// Ask the machine to shut down once the current step completes.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }
}
