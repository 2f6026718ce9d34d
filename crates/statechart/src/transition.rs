//! Transition edges: triggers, guards, actions and the fluent spec used by
//! the graph builder.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ActionFn, GuardFn, MachineContext, TriggerFn};
use crate::error::HookError;
use crate::graph::VertexId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identifier of a transition within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub(crate) u32);

impl TransitionId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// External transitions exit their source; internal transitions run only
/// their action.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    External,
    Internal,
}

/// What enables a transition.
pub enum Trigger<E> {
    /// Untriggered: fires when the source state completes.
    Completion,
    /// Fires for posted events matching the predicate.
    Event(TriggerFn<E>),
    /// Fires when the source state's timeout elapses.
    Timeout,
}

impl<E> Clone for Trigger<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Completion => Self::Completion,
            Self::Event(f) => Self::Event(Arc::clone(f)),
            Self::Timeout => Self::Timeout,
        }
    }
}

impl<E> fmt::Debug for Trigger<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completion => f.write_str("Completion"),
            Self::Event(_) => f.write_str("Event"),
            Self::Timeout => f.write_str("Timeout"),
        }
    }
}

/// A directed edge between two vertices.
pub struct Transition<E> {
    pub(crate) source: VertexId,
    pub(crate) target: Option<VertexId>,
    pub(crate) trigger: Trigger<E>,
    pub(crate) guard: Option<GuardFn<E>>,
    pub(crate) action: Option<ActionFn<E>>,
    pub(crate) kind: TransitionKind,
    pub(crate) label: Option<String>,
    pub(crate) alive: bool,
}

impl<E> Transition<E> {
    pub fn source(&self) -> VertexId {
        self.source
    }

    /// `None` loops back to the source.
    pub fn target(&self) -> Option<VertexId> {
        self.target
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn trigger(&self) -> &Trigger<E> {
        &self.trigger
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

impl<E> Clone for Transition<E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            target: self.target,
            trigger: self.trigger.clone(),
            guard: self.guard.clone(),
            action: self.action.clone(),
            kind: self.kind,
            label: self.label.clone(),
            alive: self.alive,
        }
    }
}

/// Fluent description of a transition, consumed by the graph builder.
///
/// Anything that implements `Into<TransitionSpec>` can stand where a
/// transition is expected; in particular a plain event value is lifted to an
/// equality trigger on that value, so `chain(a).via('x').to(b)` reads the way
/// the diagram does.
pub struct TransitionSpec<E> {
    pub(crate) trigger: Trigger<E>,
    pub(crate) guard: Option<GuardFn<E>>,
    pub(crate) action: Option<ActionFn<E>>,
    pub(crate) kind: TransitionKind,
    pub(crate) label: Option<String>,
    pub(crate) delay: Option<Duration>,
}

impl<E> TransitionSpec<E> {
    fn new(trigger: Trigger<E>) -> Self {
        Self {
            trigger,
            guard: None,
            action: None,
            kind: TransitionKind::External,
            label: None,
            delay: None,
        }
    }

    /// Transition enabled by events matching `pred`.
    pub fn on(pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self::new(Trigger::Event(Arc::new(pred)))
    }

    /// Untriggered transition, enabled when the source completes.
    pub fn completion() -> Self {
        Self::new(Trigger::Completion)
    }

    /// Transition fired when the source is not left within `delay`.
    ///
    /// Associating the spec also declares the timeout on the source state;
    /// declaring two different delays for one state is a structural defect.
    pub fn after(delay: Duration) -> Self {
        let mut spec = Self::new(Trigger::Timeout);
        spec.delay = Some(delay);
        spec.label = Some(format!("after {delay:?}"));
        spec
    }

    /// Timeout-triggered transition for a source whose timeout is declared
    /// separately on the state.
    pub fn on_timeout() -> Self {
        Self::new(Trigger::Timeout)
    }

    pub fn guard(mut self, g: impl Fn(&MachineContext<E>, Option<&E>) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(move |ctx, evt| Ok(g(ctx, evt))));
        self
    }

    /// Guard that may fault; a fault counts as false and emits a diagnostic.
    pub fn guard_fallible(
        mut self,
        g: impl Fn(&MachineContext<E>, Option<&E>) -> Result<bool, HookError> + Send + Sync + 'static,
    ) -> Self {
        self.guard = Some(Arc::new(g));
        self
    }

    pub fn run(mut self, a: impl Fn(&MachineContext<E>, Option<&E>) + Send + Sync + 'static) -> Self {
        self.action = Some(Arc::new(move |ctx, evt| {
            a(ctx, evt);
            Ok(())
        }));
        self
    }

    /// Action that may fault; a fault is logged and the step carries on.
    pub fn run_fallible(
        mut self,
        a: impl Fn(&MachineContext<E>, Option<&E>) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.action = Some(Arc::new(a));
        self
    }

    /// Mark the transition internal: no exit, no entry, action only.
    pub fn internal(mut self) -> Self {
        self.kind = TransitionKind::Internal;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Lift a literal event value into an equality trigger on that value.
impl<E> From<E> for TransitionSpec<E>
where
    E: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn from(value: E) -> Self {
        let label = format!("{value:?}");
        TransitionSpec::on(move |e: &E| *e == value).label(label)
    }
}
