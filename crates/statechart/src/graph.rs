//! In-memory model of the state graph.
//!
//! Vertices live in an arena keyed by [`VertexId`]; parent links, child lists
//! and transition endpoints are ids rather than owning references. That keeps
//! the cyclic graph (parent back-pointers, cross-edge transitions) free of
//! ownership cycles and makes deep-cloning for composition a reindex over the
//! arena. Masking detaches a subtree and tombstones its entries so ids held
//! by the caller stay stable.

use std::fmt;
use std::time::Duration;

use crate::context::{DoHookFn, StateHook};
use crate::error::StructuralError;
use crate::transition::{Transition, TransitionId, TransitionKind, TransitionSpec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identifier of a vertex within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub(crate) u32);

impl VertexId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a vertex. States (simple, composite, parallel) can be entered and
/// stay active; pseudostates are traversed within a single step, except Final
/// which remains in the configuration as the terminal mark of its region.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexKind {
    Simple,
    Composite,
    Parallel,
    Initial,
    Final,
    Terminate,
    Junction,
    ShallowHistory,
    DeepHistory,
}

impl VertexKind {
    pub fn is_pseudostate(self) -> bool {
        !matches!(self, Self::Simple | Self::Composite | Self::Parallel)
    }

    pub fn is_history(self) -> bool {
        matches!(self, Self::ShallowHistory | Self::DeepHistory)
    }

    pub fn has_regions(self) -> bool {
        matches!(self, Self::Parallel)
    }

    /// Sinks are never the source of a transition.
    pub fn is_sink(self) -> bool {
        matches!(self, Self::Final | Self::Terminate)
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "simple",
            Self::Composite => "composite",
            Self::Parallel => "parallel",
            Self::Initial => "initial",
            Self::Final => "final",
            Self::Terminate => "terminate",
            Self::Junction => "junction",
            Self::ShallowHistory => "shallow history",
            Self::DeepHistory => "deep history",
        };
        f.write_str(name)
    }
}

/// Node in the state graph.
pub struct Vertex<E> {
    pub(crate) id: VertexId,
    pub(crate) name: Option<String>,
    pub(crate) kind: VertexKind,
    pub(crate) parent: Option<VertexId>,
    pub(crate) children: Vec<VertexId>,
    pub(crate) initial: Option<VertexId>,
    pub(crate) entry: Option<StateHook<E>>,
    pub(crate) exit: Option<StateHook<E>>,
    pub(crate) do_activity: Option<DoHookFn<E>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) outgoing: Vec<TransitionId>,
    /// False once the vertex has been masked away.
    pub(crate) alive: bool,
    /// True while the vertex hangs off the root only because nothing else
    /// claimed it yet; adoption into a composite is still allowed.
    pub(crate) provisional_parent: bool,
}

impl<E> Vertex<E> {
    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    pub fn parent(&self) -> Option<VertexId> {
        self.parent
    }

    pub fn children(&self) -> &[VertexId] {
        &self.children
    }

    pub fn initial(&self) -> Option<VertexId> {
        self.initial
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn outgoing(&self) -> &[TransitionId] {
        &self.outgoing
    }
}

impl<E> Clone for Vertex<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            parent: self.parent,
            children: self.children.clone(),
            initial: self.initial,
            entry: self.entry.clone(),
            exit: self.exit.clone(),
            do_activity: self.do_activity.clone(),
            timeout: self.timeout,
            outgoing: self.outgoing.clone(),
            alive: self.alive,
            provisional_parent: self.provisional_parent,
        }
    }
}

/// Arena of vertices and transitions forming one state machine graph.
///
/// The graph is freely mutable while it is being assembled and freezes when
/// the machine starts. Construction defects (parent conflicts, transitions
/// out of sinks, ...) are recorded rather than returned so fluent assembly
/// never threads `Result`; validation reports the first one.
pub struct StateGraph<E> {
    pub(crate) vertices: Vec<Vertex<E>>,
    pub(crate) transitions: Vec<Transition<E>>,
    root: VertexId,
    pub(crate) defects: Vec<StructuralError>,
}

impl<E> Default for StateGraph<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> StateGraph<E> {
    pub fn new() -> Self {
        let root = Vertex {
            id: VertexId(0),
            name: None,
            kind: VertexKind::Composite,
            parent: None,
            children: Vec::new(),
            initial: None,
            entry: None,
            exit: None,
            do_activity: None,
            timeout: None,
            outgoing: Vec::new(),
            alive: true,
            provisional_parent: false,
        };
        Self {
            vertices: vec![root],
            transitions: Vec::new(),
            root: VertexId(0),
            defects: Vec::new(),
        }
    }

    /// The implicit top-level composite every graph is rooted in.
    pub fn root(&self) -> VertexId {
        self.root
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex<E> {
        &self.vertices[id.index()]
    }

    pub(crate) fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex<E> {
        &mut self.vertices[id.index()]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition<E> {
        &self.transitions[id.index()]
    }

    /// Live vertices in arena order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex<E>> {
        self.vertices.iter().filter(|v| v.alive)
    }

    /// Live transitions in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition<E>)> {
        self.transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.alive)
            .map(|(i, t)| (TransitionId(i as u32), t))
    }

    /// Display label of a vertex: its name, or a positional fallback.
    pub fn label(&self, id: VertexId) -> String {
        match self.vertex(id).name.as_deref() {
            Some(name) => name.to_string(),
            None => format!("{id}"),
        }
    }

    pub(crate) fn defect(&mut self, defect: StructuralError) {
        self.defects.push(defect);
    }

    // ------------------------------------------------------------------
    // Vertex creation

    pub(crate) fn add_vertex(
        &mut self,
        kind: VertexKind,
        name: Option<String>,
        parent: Option<VertexId>,
        provisional: bool,
    ) -> VertexId {
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex {
            id,
            name,
            kind,
            parent: None,
            children: Vec::new(),
            initial: None,
            entry: None,
            exit: None,
            do_activity: None,
            timeout: None,
            outgoing: Vec::new(),
            alive: true,
            provisional_parent: provisional,
        });
        if let Some(p) = parent {
            self.connect_substate(p, id, false);
            self.vertex_mut(id).provisional_parent = provisional;
        }
        id
    }

    /// Top-level simple state; the root holds it until a composite adopts it.
    pub fn state(&mut self, name: impl Into<String>) -> VertexId {
        let root = self.root;
        self.add_vertex(VertexKind::Simple, Some(name.into()), Some(root), true)
    }

    /// Simple state under an explicit parent.
    pub fn state_in(&mut self, name: impl Into<String>, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::Simple, Some(name.into()), Some(parent), false)
    }

    /// Top-level parallel state.
    pub fn parallel(&mut self, name: impl Into<String>) -> VertexId {
        let root = self.root;
        self.add_vertex(VertexKind::Parallel, Some(name.into()), Some(root), true)
    }

    pub fn parallel_in(&mut self, name: impl Into<String>, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::Parallel, Some(name.into()), Some(parent), false)
    }

    /// Initial pseudostate of `parent`; designates the default entry point.
    pub fn initial_in(&mut self, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::Initial, None, Some(parent), false)
    }

    pub fn final_in(&mut self, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::Final, None, Some(parent), false)
    }

    pub fn terminate_in(&mut self, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::Terminate, None, Some(parent), false)
    }

    pub fn junction_in(&mut self, name: impl Into<String>, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::Junction, Some(name.into()), Some(parent), false)
    }

    pub fn shallow_history_in(&mut self, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::ShallowHistory, None, Some(parent), false)
    }

    pub fn deep_history_in(&mut self, parent: VertexId) -> VertexId {
        self.add_vertex(VertexKind::DeepHistory, None, Some(parent), false)
    }

    // ------------------------------------------------------------------
    // Structure edits

    /// Make `child` a substate of `parent`. A simple parent is promoted to a
    /// composite. Reparenting is only allowed away from the provisional root
    /// attachment.
    pub fn add_child(&mut self, parent: VertexId, child: VertexId) {
        self.connect_substate(parent, child, false);
    }

    /// Designate `child` as the initial substate of `parent`.
    pub fn set_initial(&mut self, parent: VertexId, child: VertexId) {
        if self.vertex(child).parent != Some(parent) {
            self.connect_substate(parent, child, true);
        } else {
            self.mark_initial(parent, child);
        }
    }

    fn connect_substate(&mut self, parent: VertexId, child: VertexId, initial: bool) {
        match self.vertex(child).parent {
            Some(p) if p == parent => {}
            Some(p) if self.vertex(child).provisional_parent => {
                // Detach from the provisional root attachment.
                let old = self.vertex_mut(p);
                old.children.retain(|&c| c != child);
                if old.initial == Some(child) {
                    old.initial = None;
                }
                self.place_child(parent, child);
            }
            Some(_) => {
                let label = self.label(child);
                self.defect(StructuralError::ParentConflict(label));
                return;
            }
            None => self.place_child(parent, child),
        }
        if initial || self.vertex(child).kind == VertexKind::Initial {
            self.mark_initial(parent, child);
        }
    }

    fn place_child(&mut self, parent: VertexId, child: VertexId) {
        if self.vertex(parent).kind == VertexKind::Simple {
            self.vertex_mut(parent).kind = VertexKind::Composite;
        }
        self.vertex_mut(parent).children.push(child);
        self.vertex_mut(child).parent = Some(parent);
        self.vertex_mut(child).provisional_parent = false;
    }

    fn mark_initial(&mut self, parent: VertexId, child: VertexId) {
        match self.vertex(parent).initial {
            Some(existing) if existing != child => {
                let label = self.label(parent);
                self.defect(StructuralError::InitialConflict(label));
            }
            _ => self.vertex_mut(parent).initial = Some(child),
        }
    }

    /// Declare the timeout of a state; arming happens on entry.
    pub fn set_timeout(&mut self, state: VertexId, delay: Duration) {
        if self.vertex(state).kind.is_pseudostate() {
            let label = self.label(state);
            self.defect(StructuralError::TimeoutOnPseudostate(label));
            return;
        }
        match self.vertex(state).timeout {
            Some(existing) if existing != delay => {
                let label = self.label(state);
                self.defect(StructuralError::ConflictingTimeout(label));
            }
            _ => self.vertex_mut(state).timeout = Some(delay),
        }
    }

    pub(crate) fn set_entry(&mut self, state: VertexId, hook: StateHook<E>) {
        self.vertex_mut(state).entry = Some(hook);
    }

    pub(crate) fn set_exit(&mut self, state: VertexId, hook: StateHook<E>) {
        self.vertex_mut(state).exit = Some(hook);
    }

    pub(crate) fn set_do(&mut self, state: VertexId, hook: DoHookFn<E>) {
        self.vertex_mut(state).do_activity = Some(hook);
    }

    /// Associate a transition from `source`, optionally to `target` (absent
    /// target loops back to the source). Returns the new edge's id.
    pub fn connect(
        &mut self,
        source: VertexId,
        spec: impl Into<TransitionSpec<E>>,
        target: Option<VertexId>,
    ) -> TransitionId {
        let spec = spec.into();
        if self.vertex(source).kind.is_sink() {
            let label = self.label(source);
            self.defect(StructuralError::SinkSource(label));
        }
        if let Some(t) = target {
            if self.vertex(t).kind == VertexKind::Initial {
                self.defect(StructuralError::TargetIsInitial);
            }
        }
        let mut target = target;
        if spec.kind == TransitionKind::Internal {
            if target.is_some() && target != Some(source) {
                let label = self.label(source);
                self.defect(StructuralError::InternalWithTarget(label));
            }
            target = None;
        }
        if let Some(delay) = spec.delay {
            self.set_timeout(source, delay);
        }
        let id = TransitionId(self.transitions.len() as u32);
        self.transitions.push(Transition {
            source,
            target,
            trigger: spec.trigger,
            guard: spec.guard,
            action: spec.action,
            kind: spec.kind,
            label: spec.label,
            alive: true,
        });
        self.vertex_mut(source).outgoing.push(id);
        id
    }

    /// Internal transition: runs its action without exiting or entering.
    pub fn internal(&mut self, source: VertexId, spec: impl Into<TransitionSpec<E>>) -> TransitionId {
        let spec = spec.into().internal();
        self.connect(source, spec, None)
    }

    // ------------------------------------------------------------------
    // Queries

    /// Path from `v` to the root, inclusive on both ends.
    pub fn path_to_root(&self, v: VertexId) -> Vec<VertexId> {
        let mut path = vec![v];
        let mut cur = v;
        while let Some(p) = self.vertex(cur).parent {
            path.push(p);
            cur = p;
        }
        path
    }

    pub fn depth(&self, v: VertexId) -> usize {
        let mut depth = 0;
        let mut cur = v;
        while let Some(p) = self.vertex(cur).parent {
            depth += 1;
            cur = p;
        }
        depth
    }

    /// Is `a` an ancestor of `b` (inclusive)?
    pub fn is_ancestor(&self, a: VertexId, b: VertexId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.vertex(cur).parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// Paths to the least common ancestor of `a` and `b`: the first runs from
    /// `a` up to the LCA inclusive, the second from the LCA down to `b`.
    pub fn lca_paths(&self, a: VertexId, b: VertexId) -> (Vec<VertexId>, Vec<VertexId>) {
        let mut up = vec![a];
        let mut down = vec![b];
        let (mut x, mut y) = (a, b);
        let (mut dx, mut dy) = (self.depth(a), self.depth(b));
        while dx > dy {
            x = self.vertex(x).parent.expect("vertex deeper than root");
            up.push(x);
            dx -= 1;
        }
        while dy > dx {
            y = self.vertex(y).parent.expect("vertex deeper than root");
            down.push(y);
            dy -= 1;
        }
        while x != y {
            x = self.vertex(x).parent.expect("vertices share a root");
            y = self.vertex(y).parent.expect("vertices share a root");
            up.push(x);
            down.push(y);
        }
        // `down` currently ends at the LCA; flip it to run LCA -> b.
        down.reverse();
        (up, down)
    }

    /// Deepest vertex that is an ancestor of both `a` and `b` (inclusive).
    pub fn lca(&self, a: VertexId, b: VertexId) -> VertexId {
        let (up, _) = self.lca_paths(a, b);
        *up.last().expect("path to LCA is never empty")
    }

    pub fn transitions_from(&self, v: VertexId) -> &[TransitionId] {
        &self.vertex(v).outgoing
    }

    pub fn transitions_into(&self, v: VertexId) -> Vec<TransitionId> {
        self.transitions()
            .filter(|(_, t)| t.target == Some(v))
            .map(|(id, _)| id)
            .collect()
    }

    /// Depth-first preorder over live vertices, siblings in declaration
    /// order. This is the order tie-breaks are resolved in.
    pub fn preorder(&self) -> Vec<VertexId> {
        let mut out = Vec::with_capacity(self.vertices.len());
        let mut stack = vec![self.root];
        while let Some(v) = stack.pop() {
            out.push(v);
            for &c in self.vertex(v).children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Direct child of `parent` with the given name.
    pub fn child_by_name(&self, parent: VertexId, name: &str) -> Option<VertexId> {
        self.vertex(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.vertex(c).name.as_deref() == Some(name))
    }
}
