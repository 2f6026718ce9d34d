//! Run-to-completion execution over a frozen graph.
//!
//! The interpreter owns the configuration, history records and timers; it
//! lives on the consumer thread and is never touched from outside. One step
//! dispatches one event: the selector produces an execution set, each plan
//! runs exits deepest-first, the transition actions in traversal order, and
//! entries shallowest-first, then completion events bubble until the machine
//! is quiescent again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::context::{DoToken, MachineContext, Shared};
use crate::error::StructuralError;
use crate::graph::{StateGraph, VertexId, VertexKind};
use crate::select::{Leg, Plan};
use crate::timer::TimerQueue;
use crate::transition::TransitionId;

/// Configuration snapshot recorded when a composite with a history
/// pseudostate exits.
pub(crate) enum HistorySnapshot {
    /// Last active direct child.
    Shallow(VertexId),
    /// Deepest active descendants, one per nested region.
    Deep(Vec<VertexId>),
}

/// Mutable interpreter state, consumer-thread local.
pub(crate) struct RunState {
    pub(crate) active: HashSet<VertexId>,
    pub(crate) active_child: HashMap<VertexId, VertexId>,
    pub(crate) history: HashMap<VertexId, HistorySnapshot>,
    pub(crate) completed: VecDeque<VertexId>,
    pub(crate) regions_left: HashMap<VertexId, HashSet<VertexId>>,
    pub(crate) timers: TimerQueue,
    pub(crate) stamps: HashMap<VertexId, u64>,
    next_stamp: u64,
    pub(crate) do_tokens: HashMap<VertexId, DoToken>,
    pub(crate) terminated: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            active: HashSet::new(),
            active_child: HashMap::new(),
            history: HashMap::new(),
            completed: VecDeque::new(),
            regions_left: HashMap::new(),
            timers: TimerQueue::new(),
            stamps: HashMap::new(),
            next_stamp: 0,
            do_tokens: HashMap::new(),
            terminated: false,
        }
    }
}

pub(crate) struct Interpreter<E: Send + 'static> {
    pub(crate) graph: Arc<StateGraph<E>>,
    pub(crate) shared: Arc<Shared<E>>,
    pub(crate) run: RunState,
    /// Preorder index of every vertex, the declaration-order tie-break.
    pub(crate) order: HashMap<VertexId, usize>,
}

impl<E: Send + 'static> Interpreter<E> {
    pub(crate) fn new(graph: Arc<StateGraph<E>>, shared: Arc<Shared<E>>) -> Self {
        let order = graph
            .preorder()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (v, i))
            .collect();
        Self {
            graph,
            shared,
            run: RunState::new(),
            order,
        }
    }

    /// Enter the root's default configuration and settle completions.
    pub(crate) fn enter_initial(&mut self) -> Result<(), StructuralError> {
        let root = self.graph.root();
        self.enter_vertex(root);
        let legs = self.initial_plan()?;
        for leg in &legs {
            if self.run.terminated {
                break;
            }
            self.execute_leg(leg, None)?;
        }
        self.drain_completions()
    }

    /// One run-to-completion step for an external event.
    pub(crate) fn step_event(&mut self, event: &E) -> Result<(), StructuralError> {
        let plans = self.select_for_event(event)?;
        if plans.is_empty() {
            debug!("no enabled transition, event discarded");
            return Ok(());
        }
        for plan in &plans {
            if self.run.terminated {
                break;
            }
            self.execute_plan(plan, Some(event))?;
        }
        self.drain_completions()
    }

    /// One run-to-completion step for an expired state timeout.
    pub(crate) fn step_timeout(&mut self, vertex: VertexId, stamp: u64) -> Result<(), StructuralError> {
        if let Some(plan) = self.select_for_timeout(vertex, stamp)? {
            self.execute_plan(&plan, None)?;
            self.drain_completions()?;
        }
        Ok(())
    }

    /// Process queued completion events until none produce a transition.
    fn drain_completions(&mut self) -> Result<(), StructuralError> {
        let graph = Arc::clone(&self.graph);
        while !self.run.terminated {
            let Some(v) = self.run.completed.pop_front() else {
                break;
            };
            if !self.run.active.contains(&v) {
                continue;
            }
            debug!(state = %graph.label(v), "completed");
            let parent = graph.vertex(v).parent();
            if let Some(plan) = self.select_for_completion(v)? {
                self.execute_plan(&plan, None)?;
            }
            if self.run.terminated {
                break;
            }
            match parent {
                None => {
                    // The top-level region is done: leave every state and stop.
                    self.exit_subtree(graph.root());
                    self.run.terminated = true;
                }
                Some(p)
                    if graph.vertex(p).kind() == VertexKind::Parallel
                        && self.run.active.contains(&p) =>
                {
                    if let Some(left) = self.run.regions_left.get_mut(&p) {
                        if left.remove(&v) && left.is_empty() {
                            self.run.completed.push_back(p);
                        }
                    }
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn execute_plan(&mut self, plan: &Plan, event: Option<&E>) -> Result<(), StructuralError> {
        if !self.run.active.contains(&plan.source) {
            debug!(
                source = %self.graph.label(plan.source),
                "transition source left the configuration, plan dropped"
            );
            return Ok(());
        }
        if plan.internal {
            self.run_action(Some(plan.main), event);
            return Ok(());
        }
        for leg in &plan.legs {
            if self.run.terminated {
                break;
            }
            self.execute_leg(leg, event)?;
        }
        Ok(())
    }

    fn execute_leg(&mut self, leg: &Leg, event: Option<&E>) -> Result<(), StructuralError> {
        let graph = Arc::clone(&self.graph);
        if let Some(restore) = &leg.restore {
            self.run_action(leg.action_of, event);
            for &v in restore {
                self.link_to_parent(&graph, v);
                if !self.run.active.contains(&v) {
                    self.enter_vertex(v);
                }
            }
            return Ok(());
        }
        let (s_path, t_path) = graph.lca_paths(leg.src, leg.tgt);
        let lca = *s_path.last().expect("paths are never empty");
        let reenter = leg.main && (s_path.len() == 1 || t_path.len() == 1);
        let exit_top = if reenter {
            Some(lca)
        } else if s_path.len() > 1 {
            let candidate = s_path[s_path.len() - 2];
            self.run.active.contains(&candidate).then_some(candidate)
        } else {
            None
        };
        if let Some(top) = exit_top {
            self.exit_subtree(top);
        }
        self.run_action(leg.action_of, event);
        let mut entries: Vec<VertexId> = Vec::new();
        if reenter {
            entries.push(lca);
        }
        entries.extend(t_path.iter().skip(1).copied());
        for v in entries {
            let kind = graph.vertex(v).kind();
            if kind == VertexKind::Terminate {
                debug!("terminate pseudostate reached, machine stops");
                self.run.terminated = true;
                return Ok(());
            }
            if kind.is_pseudostate() && kind != VertexKind::Final {
                continue;
            }
            if !self.run.active.contains(&v) {
                self.link_to_parent(&graph, v);
                self.enter_vertex(v);
            }
        }
        Ok(())
    }

    fn link_to_parent(&mut self, graph: &StateGraph<E>, v: VertexId) {
        if let Some(p) = graph.vertex(v).parent() {
            if graph.vertex(p).kind() != VertexKind::Parallel {
                self.run.active_child.insert(p, v);
            }
        }
    }

    fn run_action(&mut self, tid: Option<TransitionId>, event: Option<&E>) {
        let Some(tid) = tid else { return };
        let graph = Arc::clone(&self.graph);
        let t = graph.transition(tid);
        if let Some(label) = t.label() {
            debug!(transition = label, "following transition");
        }
        if let Some(action) = t.action.clone() {
            let ctx = MachineContext::new(&self.shared);
            if let Err(fault) = action(&ctx, event) {
                warn!(%fault, "transition action fault");
            }
        }
    }

    pub(crate) fn enter_vertex(&mut self, v: VertexId) {
        let graph = Arc::clone(&self.graph);
        let vertex = graph.vertex(v);
        self.run.active.insert(v);
        debug!(state = %graph.label(v), "entering");
        if let Some(hook) = vertex.entry.clone() {
            let ctx = MachineContext::new(&self.shared);
            if let Err(fault) = hook(&ctx) {
                warn!(state = %graph.label(v), %fault, "entry behavior fault");
            }
        }
        if let Some(delay) = vertex.timeout() {
            let stamp = self.run.next_stamp;
            self.run.next_stamp += 1;
            self.run.stamps.insert(v, stamp);
            self.run.timers.arm(v, stamp, Instant::now() + delay);
        }
        if let Some(hook) = vertex.do_activity.clone() {
            let token = DoToken::default();
            self.run.do_tokens.insert(v, token.clone());
            let ctx = MachineContext::new(&self.shared);
            if let Err(fault) = hook(&ctx, token) {
                warn!(state = %graph.label(v), %fault, "do activity fault");
            }
        }
        match vertex.kind() {
            VertexKind::Parallel => {
                let regions: HashSet<VertexId> = vertex
                    .children()
                    .iter()
                    .copied()
                    .filter(|&c| !graph.vertex(c).kind().is_history())
                    .collect();
                self.run.regions_left.insert(v, regions);
            }
            VertexKind::Final => {
                if let Some(p) = vertex.parent() {
                    self.run.completed.push_back(p);
                }
            }
            VertexKind::Simple | VertexKind::Composite if vertex.children().is_empty() => {
                self.run.completed.push_back(v);
            }
            _ => {}
        }
    }

    /// Exit the whole active subtree under `top`, deepest first. History is
    /// snapshotted before anything below changes.
    pub(crate) fn exit_subtree(&mut self, top: VertexId) {
        let graph = Arc::clone(&self.graph);
        let vertex = graph.vertex(top);
        if let Some(&h) = vertex
            .children()
            .iter()
            .find(|&&c| graph.vertex(c).kind().is_history())
        {
            self.record_history(top, graph.vertex(h).kind());
        }
        if vertex.kind() == VertexKind::Parallel {
            for &region in vertex.children() {
                if self.run.active.contains(&region) {
                    self.exit_subtree(region);
                }
            }
        } else {
            let child = self.run.active_child.get(&top).copied();
            if let Some(child) = child {
                if self.run.active.contains(&child) {
                    self.exit_subtree(child);
                }
            }
        }
        self.exit_vertex(top);
    }

    fn record_history(&mut self, composite: VertexId, kind: VertexKind) {
        match kind {
            VertexKind::ShallowHistory => {
                match self
                    .run
                    .active_child
                    .get(&composite)
                    .copied()
                    .filter(|c| self.run.active.contains(c))
                {
                    Some(child) => {
                        self.run
                            .history
                            .insert(composite, HistorySnapshot::Shallow(child));
                    }
                    None => {
                        self.run.history.remove(&composite);
                    }
                }
            }
            VertexKind::DeepHistory => {
                let leaves = self.active_leaves_rooted(composite);
                if leaves == vec![composite] {
                    self.run.history.remove(&composite);
                } else {
                    self.run
                        .history
                        .insert(composite, HistorySnapshot::Deep(leaves));
                }
            }
            _ => {}
        }
    }

    fn exit_vertex(&mut self, v: VertexId) {
        let graph = Arc::clone(&self.graph);
        if let Some(token) = self.run.do_tokens.remove(&v) {
            token.cancel();
        }
        self.run.stamps.remove(&v);
        if let Some(hook) = graph.vertex(v).exit.clone() {
            let ctx = MachineContext::new(&self.shared);
            if let Err(fault) = hook(&ctx) {
                warn!(state = %graph.label(v), %fault, "exit behavior fault");
            }
        }
        debug!(state = %graph.label(v), "exiting");
        self.run.active.remove(&v);
        self.run.active_child.remove(&v);
        self.run.regions_left.remove(&v);
        if let Some(p) = graph.vertex(v).parent() {
            if self.run.active_child.get(&p) == Some(&v) {
                self.run.active_child.remove(&p);
            }
        }
        self.run.completed.retain(|&x| x != v);
    }

    /// Deepest active vertices under `root`, preorder across regions.
    pub(crate) fn active_leaves_rooted(&self, root: VertexId) -> Vec<VertexId> {
        let mut out = Vec::new();
        self.collect_leaves(root, &mut out);
        out
    }

    pub(crate) fn active_leaves(&self) -> Vec<VertexId> {
        self.active_leaves_rooted(self.graph.root())
    }

    fn collect_leaves(&self, v: VertexId, out: &mut Vec<VertexId>) {
        let vertex = self.graph.vertex(v);
        let mut descended = false;
        if vertex.kind() == VertexKind::Parallel {
            for &region in vertex.children() {
                if self.run.active.contains(&region) {
                    descended = true;
                    self.collect_leaves(region, out);
                }
            }
        } else if let Some(&child) = self.run.active_child.get(&v) {
            if self.run.active.contains(&child) {
                descended = true;
                self.collect_leaves(child, out);
            }
        }
        if !descended {
            out.push(v);
        }
    }

    /// Leave every remaining state, deepest first. Used by the graceful
    /// shutdown path; termination skips it.
    pub(crate) fn shutdown_sweep(&mut self) {
        let root = self.graph.root();
        if self.run.active.contains(&root) {
            self.exit_subtree(root);
        }
        self.run.terminated = true;
    }

    /// Publish the current configuration labels for the handle side.
    pub(crate) fn publish_snapshot(&self) {
        let mut ids: Vec<VertexId> = self.run.active.iter().copied().collect();
        ids.sort_by_key(|v| self.order.get(v).copied().unwrap_or(usize::MAX));
        let labels: Vec<String> = ids.into_iter().map(|v| self.graph.label(v)).collect();
        *self
            .shared
            .snapshot
            .lock()
            .expect("snapshot lock poisoned") = labels;
    }

    /// Earliest pending timer deadline.
    pub(crate) fn next_timer_deadline(&mut self) -> Option<Instant> {
        self.run.timers.next_deadline(&self.run.stamps)
    }

    /// Timers due now, stale entries dropped.
    pub(crate) fn due_timers(&mut self) -> Vec<(VertexId, u64)> {
        self.run.timers.pop_due(Instant::now(), &self.run.stamps)
    }
}
