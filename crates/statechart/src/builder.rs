//! Fluent assembly of state graphs.
//!
//! A [`Chain`] strings vertices together the way a diagram reads: each
//! `via(trigger).to(state)` associates a transition and leaves the chain
//! positioned on the right-hand vertex, ready for the next association.
//! `to` without a preceding `via` makes a completion transition. A finished
//! chain can be adopted as the body of a composite, which parents every
//! member and marks the leftmost vertex initial.

use crate::context::{DoHookFn, DoToken, MachineContext, StateHook};
use crate::error::HookError;
use crate::graph::{StateGraph, VertexId, VertexKind};
use crate::transition::TransitionSpec;
use std::sync::Arc;
use std::time::Duration;

/// In-progress chain of associations over a graph.
pub struct Chain<'g, E> {
    graph: &'g mut StateGraph<E>,
    head: VertexId,
    cursor: VertexId,
    pending: Option<TransitionSpec<E>>,
    members: Vec<VertexId>,
}

/// The states a finished chain touched, for adoption into a composite.
pub struct ChainSpec {
    pub(crate) head: VertexId,
    pub(crate) members: Vec<VertexId>,
}

impl<'g, E> Chain<'g, E> {
    pub(crate) fn new(graph: &'g mut StateGraph<E>, head: VertexId) -> Self {
        Self {
            graph,
            head,
            cursor: head,
            pending: None,
            members: vec![head],
        }
    }

    /// Record the trigger/transition for the next association. A plain event
    /// value is lifted to an equality trigger on that value.
    pub fn via(mut self, spec: impl Into<TransitionSpec<E>>) -> Self {
        self.pending = Some(spec.into());
        self
    }

    /// Associate the pending transition (completion if none) from the chain
    /// position to `target`, and move the chain onto `target`.
    pub fn to(mut self, target: VertexId) -> Self {
        let spec = self.pending.take().unwrap_or_else(TransitionSpec::completion);
        self.graph.connect(self.cursor, spec, Some(target));
        self.cursor = target;
        if !self.members.contains(&target) {
            self.members.push(target);
        }
        self
    }

    /// The vertex the chain currently sits on.
    pub fn tail(&self) -> VertexId {
        self.cursor
    }

    pub fn head(&self) -> VertexId {
        self.head
    }

    /// Finish the chain, keeping the membership record for adoption.
    pub fn done(self) -> ChainSpec {
        ChainSpec {
            head: self.head,
            members: self.members,
        }
    }
}

impl<E> StateGraph<E> {
    /// Begin a chain of associations at `head`.
    pub fn chain(&mut self, head: VertexId) -> Chain<'_, E> {
        Chain::new(self, head)
    }

    /// Parent every member of the chain under `parent`; the chain head (or an
    /// explicit initial pseudostate among the members) becomes the initial
    /// substate.
    pub fn adopt(&mut self, parent: VertexId, chain: ChainSpec) {
        for &member in &chain.members {
            self.add_child(parent, member);
        }
        let explicit_initial = chain
            .members
            .iter()
            .copied()
            .find(|&m| self.vertex(m).kind() == VertexKind::Initial);
        if self.vertex(parent).initial().is_none() {
            self.set_initial(parent, explicit_initial.unwrap_or(chain.head));
        }
    }

    /// Create a composite whose body is the given chain.
    pub fn composite(&mut self, name: impl Into<String>, chain: ChainSpec) -> VertexId {
        let id = self.state(name);
        self.adopt(id, chain);
        id
    }

    /// Configure hooks and attributes of an existing vertex.
    pub fn configure(&mut self, id: VertexId) -> VertexHandle<'_, E> {
        VertexHandle { graph: self, id }
    }
}

/// Fluent configuration of a single vertex.
pub struct VertexHandle<'g, E> {
    graph: &'g mut StateGraph<E>,
    id: VertexId,
}

impl<'g, E> VertexHandle<'g, E> {
    pub fn id(&self) -> VertexId {
        self.id
    }

    /// Behavior invoked when the state is entered.
    pub fn on_entry(self, hook: impl Fn(&MachineContext<E>) + Send + Sync + 'static) -> Self {
        let wrapped: StateHook<E> = Arc::new(move |ctx| {
            hook(ctx);
            Ok(())
        });
        self.graph.set_entry(self.id, wrapped);
        self
    }

    /// Entry behavior that may fault; a fault is logged and the step
    /// continues.
    pub fn on_entry_fallible(
        self,
        hook: impl Fn(&MachineContext<E>) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.graph.set_entry(self.id, Arc::new(hook));
        self
    }

    /// Behavior invoked when the state is exited.
    pub fn on_exit(self, hook: impl Fn(&MachineContext<E>) + Send + Sync + 'static) -> Self {
        let wrapped: StateHook<E> = Arc::new(move |ctx| {
            hook(ctx);
            Ok(())
        });
        self.graph.set_exit(self.id, wrapped);
        self
    }

    pub fn on_exit_fallible(
        self,
        hook: impl Fn(&MachineContext<E>) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.graph.set_exit(self.id, Arc::new(hook));
        self
    }

    /// Do-activity started after entry and cancelled on exit. The hook must
    /// return promptly; lasting work belongs on its own thread, watching the
    /// token.
    pub fn do_activity(
        self,
        hook: impl Fn(&MachineContext<E>, DoToken) + Send + Sync + 'static,
    ) -> Self {
        let wrapped: DoHookFn<E> = Arc::new(move |ctx, token| {
            hook(ctx, token);
            Ok(())
        });
        self.graph.set_do(self.id, wrapped);
        self
    }

    /// Declare the state's timeout; a one-shot timer is armed on entry.
    pub fn timeout(self, delay: Duration) -> Self {
        self.graph.set_timeout(self.id, delay);
        self
    }

    /// Mark this vertex as the initial substate of its parent.
    pub fn initial(self) -> Self {
        if let Some(parent) = self.graph.vertex(self.id).parent() {
            self.graph.set_initial(parent, self.id);
        }
        self
    }
}
