//! Transition selection for one dispatch.
//!
//! Selection walks the active configuration from its leaves upward, honoring
//! depth priority inside a region and independence across orthogonal
//! regions, then resolves conflicts between candidates whose exit sets
//! intersect: the deeper source wins, declaration order breaks ties.
//!
//! Compound transitions are planned statically: junction branch guards and
//! default-entry chains are evaluated here, before any exit or action runs,
//! and the result is a list of legs the executor follows atomically.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::context::{GuardFn, MachineContext};
use crate::error::StructuralError;
use crate::execute::{HistorySnapshot, Interpreter};
use crate::graph::{VertexId, VertexKind};
use crate::transition::{TransitionId, TransitionKind, Trigger};

/// One micro-transition of a compound step.
pub(crate) struct Leg {
    /// Transition whose action fires with this leg, if any.
    pub(crate) action_of: Option<TransitionId>,
    pub(crate) src: VertexId,
    pub(crate) tgt: VertexId,
    /// Only the first leg of a plan computes an exit set.
    pub(crate) main: bool,
    /// Precomputed deep-history restoration, shallow-to-deep.
    pub(crate) restore: Option<Vec<VertexId>>,
}

impl Leg {
    fn flow(src: VertexId, tgt: VertexId, action_of: Option<TransitionId>) -> Self {
        Self {
            action_of,
            src,
            tgt,
            main: false,
            restore: None,
        }
    }
}

/// Execution plan for one transition, pseudostate chain resolved.
pub(crate) struct Plan {
    pub(crate) main: TransitionId,
    pub(crate) source: VertexId,
    pub(crate) internal: bool,
    pub(crate) legs: Vec<Leg>,
}

impl<E: Send + 'static> Interpreter<E> {
    /// Execution set for an externally posted event.
    pub(crate) fn select_for_event(&self, event: &E) -> Result<Vec<Plan>, StructuralError> {
        let mut seen: HashSet<TransitionId> = HashSet::new();
        let mut plans = Vec::new();
        for leaf in self.active_leaves() {
            let mut cursor = Some(leaf);
            'climb: while let Some(v) = cursor {
                for &tid in self.graph.transitions_from(v) {
                    let t = self.graph.transition(tid);
                    let triggered = match &t.trigger {
                        Trigger::Event(pred) => pred(event),
                        _ => false,
                    };
                    if !triggered || !self.guard_passes(t.guard.as_ref(), Some(event)) {
                        continue;
                    }
                    if seen.insert(tid) {
                        plans.push(self.build_plan(tid, Some(event))?);
                    }
                    break 'climb;
                }
                cursor = self.graph.vertex(v).parent();
            }
        }
        Ok(self.resolve_conflicts(plans))
    }

    /// Plan for a timeout stamped at a particular state entry; stale stamps
    /// select nothing.
    pub(crate) fn select_for_timeout(
        &self,
        vertex: VertexId,
        stamp: u64,
    ) -> Result<Option<Plan>, StructuralError> {
        if self.run.stamps.get(&vertex) != Some(&stamp) {
            debug!(state = %self.graph.label(vertex), "stale timeout dropped");
            return Ok(None);
        }
        for &tid in self.graph.transitions_from(vertex) {
            let t = self.graph.transition(tid);
            if matches!(t.trigger, Trigger::Timeout) && self.guard_passes(t.guard.as_ref(), None) {
                return Ok(Some(self.build_plan(tid, None)?));
            }
        }
        Ok(None)
    }

    /// Plan for the completion of `vertex`: its first enabled untriggered
    /// transition, in declaration order.
    pub(crate) fn select_for_completion(
        &self,
        vertex: VertexId,
    ) -> Result<Option<Plan>, StructuralError> {
        for &tid in self.graph.transitions_from(vertex) {
            let t = self.graph.transition(tid);
            if matches!(t.trigger, Trigger::Completion) && self.guard_passes(t.guard.as_ref(), None)
            {
                return Ok(Some(self.build_plan(tid, None)?));
            }
        }
        Ok(None)
    }

    /// Legs entering the root's default configuration at start.
    pub(crate) fn initial_plan(&self) -> Result<Vec<Leg>, StructuralError> {
        let mut legs = Vec::new();
        let mut visited = HashSet::new();
        self.expand_target(self.graph.root(), None, &mut legs, &mut visited)?;
        Ok(legs)
    }

    fn guard_passes(&self, guard: Option<&GuardFn<E>>, event: Option<&E>) -> bool {
        match guard {
            None => true,
            Some(g) => {
                let ctx = MachineContext::new(&self.shared);
                match g(&ctx, event) {
                    Ok(enabled) => enabled,
                    Err(fault) => {
                        warn!(%fault, "guard fault treated as false");
                        false
                    }
                }
            }
        }
    }

    fn build_plan(&self, tid: TransitionId, event: Option<&E>) -> Result<Plan, StructuralError> {
        let t = self.graph.transition(tid);
        if t.kind == TransitionKind::Internal {
            return Ok(Plan {
                main: tid,
                source: t.source,
                internal: true,
                legs: Vec::new(),
            });
        }
        let src = t.source;
        let tgt = t.target.unwrap_or(src);
        let mut legs = vec![Leg {
            action_of: Some(tid),
            src,
            tgt,
            main: true,
            restore: None,
        }];
        let mut visited = HashSet::new();
        self.expand_off_path_regions(src, tgt, event, &mut legs, &mut visited)?;
        self.expand_target(tgt, event, &mut legs, &mut visited)?;
        Ok(Plan {
            main: tid,
            source: src,
            internal: false,
            legs,
        })
    }

    /// Entering a vertex nested inside parallel states drags the sibling
    /// regions of every parallel crossed on the way in; those regions get
    /// their default entry.
    fn expand_off_path_regions(
        &self,
        src: VertexId,
        tgt: VertexId,
        event: Option<&E>,
        legs: &mut Vec<Leg>,
        visited: &mut HashSet<VertexId>,
    ) -> Result<(), StructuralError> {
        let (_, t_path) = self.graph.lca_paths(src, tgt);
        for window in t_path.windows(2) {
            let (v, on_path) = (window[0], window[1]);
            if self.graph.vertex(v).kind() != VertexKind::Parallel {
                continue;
            }
            for &region in self.graph.vertex(v).children() {
                if region == on_path || self.graph.vertex(region).kind().is_history() {
                    continue;
                }
                legs.push(Leg::flow(v, region, None));
                self.expand_target(region, event, legs, visited)?;
            }
        }
        Ok(())
    }

    /// Resolve what entering `tgt` means: descend composites to their default
    /// configuration, fan out parallel regions, evaluate junction branches,
    /// restore history.
    fn expand_target(
        &self,
        tgt: VertexId,
        event: Option<&E>,
        legs: &mut Vec<Leg>,
        visited: &mut HashSet<VertexId>,
    ) -> Result<(), StructuralError> {
        match self.graph.vertex(tgt).kind() {
            VertexKind::Simple | VertexKind::Final | VertexKind::Terminate | VertexKind::Initial => {
                Ok(())
            }
            VertexKind::Composite => self.descend(tgt, event, legs, visited),
            VertexKind::Parallel => {
                for &region in self.graph.vertex(tgt).children() {
                    if self.graph.vertex(region).kind().is_history() {
                        continue;
                    }
                    legs.push(Leg::flow(tgt, region, None));
                    self.expand_target(region, event, legs, visited)?;
                }
                Ok(())
            }
            VertexKind::Junction => self.expand_junction(tgt, event, legs, visited),
            VertexKind::ShallowHistory | VertexKind::DeepHistory => {
                self.expand_history(tgt, event, legs, visited)
            }
        }
    }

    fn expand_junction(
        &self,
        junction: VertexId,
        event: Option<&E>,
        legs: &mut Vec<Leg>,
        visited: &mut HashSet<VertexId>,
    ) -> Result<(), StructuralError> {
        if !visited.insert(junction) {
            return Err(StructuralError::PseudostateCycle(self.graph.label(junction)));
        }
        let mut fallback = None;
        let mut chosen = None;
        for &tid in self.graph.transitions_from(junction) {
            let t = self.graph.transition(tid);
            match &t.guard {
                None => {
                    if fallback.is_none() {
                        fallback = Some(tid);
                    }
                }
                Some(g) => {
                    if self.guard_passes(Some(g), event) {
                        chosen = Some(tid);
                        break;
                    }
                }
            }
        }
        let branch = chosen
            .or(fallback)
            .ok_or_else(|| StructuralError::JunctionDeadlock(self.graph.label(junction)))?;
        let t = self.graph.transition(branch);
        let target = t.target.unwrap_or(junction);
        legs.push(Leg::flow(junction, target, Some(branch)));
        self.expand_off_path_regions(junction, target, event, legs, visited)?;
        self.expand_target(target, event, legs, visited)
    }

    fn expand_history(
        &self,
        history: VertexId,
        event: Option<&E>,
        legs: &mut Vec<Leg>,
        visited: &mut HashSet<VertexId>,
    ) -> Result<(), StructuralError> {
        if !visited.insert(history) {
            return Err(StructuralError::PseudostateCycle(self.graph.label(history)));
        }
        let composite = self
            .graph
            .vertex(history)
            .parent()
            .unwrap_or_else(|| self.graph.root());
        match self.run.history.get(&composite) {
            Some(HistorySnapshot::Shallow(child)) => {
                let child = *child;
                legs.push(Leg::flow(composite, child, None));
                self.expand_target(child, event, legs, visited)
            }
            Some(HistorySnapshot::Deep(leaves)) => {
                let restore = self.deep_restore_order(composite, leaves);
                legs.push(Leg {
                    action_of: None,
                    src: composite,
                    tgt: composite,
                    main: false,
                    restore: Some(restore),
                });
                Ok(())
            }
            None => {
                if let Some(&tid) = self.graph.transitions_from(history).first() {
                    let t = self.graph.transition(tid);
                    let target = t.target.unwrap_or(composite);
                    legs.push(Leg::flow(history, target, Some(tid)));
                    self.expand_target(target, event, legs, visited)
                } else {
                    self.descend(composite, event, legs, visited)
                }
            }
        }
    }

    /// Default entry of a composite: follow the initial designation, chaining
    /// through the initial pseudostate's transition when there is one.
    fn descend(
        &self,
        composite: VertexId,
        event: Option<&E>,
        legs: &mut Vec<Leg>,
        visited: &mut HashSet<VertexId>,
    ) -> Result<(), StructuralError> {
        let vertex = self.graph.vertex(composite);
        if vertex.children().is_empty() {
            return Ok(());
        }
        let initial = vertex
            .initial()
            .ok_or_else(|| StructuralError::MissingInitial(self.graph.label(composite)))?;
        if self.graph.vertex(initial).kind() == VertexKind::Initial {
            let &tid = self
                .graph
                .transitions_from(initial)
                .first()
                .ok_or_else(|| StructuralError::MalformedInitial(self.graph.label(composite)))?;
            let t = self.graph.transition(tid);
            let target = t
                .target
                .ok_or_else(|| StructuralError::MalformedInitial(self.graph.label(composite)))?;
            legs.push(Leg::flow(initial, target, Some(tid)));
            self.expand_off_path_regions(initial, target, event, legs, visited)?;
            self.expand_target(target, event, legs, visited)
        } else {
            legs.push(Leg::flow(composite, initial, None));
            self.expand_target(initial, event, legs, visited)
        }
    }

    /// Enter order restoring a deep-history snapshot: every ancestor of a
    /// saved leaf below the composite, shallowest first, siblings in
    /// declaration order.
    fn deep_restore_order(&self, composite: VertexId, leaves: &[VertexId]) -> Vec<VertexId> {
        let mut members: HashSet<VertexId> = HashSet::new();
        for &leaf in leaves {
            let mut cur = leaf;
            while cur != composite {
                members.insert(cur);
                match self.graph.vertex(cur).parent() {
                    Some(p) => cur = p,
                    None => break,
                }
            }
        }
        let mut out: Vec<VertexId> = members.into_iter().collect();
        out.sort_by_key(|v| self.order.get(v).copied().unwrap_or(usize::MAX));
        out
    }

    /// Keep the candidates whose exit sets stay disjoint; deeper sources win
    /// and declaration order breaks ties.
    fn resolve_conflicts(&self, mut plans: Vec<Plan>) -> Vec<Plan> {
        plans.sort_by_key(|p| {
            (
                std::cmp::Reverse(self.graph.depth(p.source)),
                self.order.get(&p.source).copied().unwrap_or(usize::MAX),
            )
        });
        let mut occupied: HashSet<VertexId> = HashSet::new();
        let mut kept = Vec::new();
        for plan in plans {
            let exits = self.exit_set(&plan);
            if exits.iter().any(|v| occupied.contains(v)) {
                debug!(
                    source = %self.graph.label(plan.source),
                    "conflicting transition suppressed"
                );
                continue;
            }
            occupied.extend(exits);
            kept.push(plan);
        }
        kept
    }

    /// Active vertices a plan will exit, used for conflict detection.
    pub(crate) fn exit_set(&self, plan: &Plan) -> HashSet<VertexId> {
        if plan.internal {
            return HashSet::new();
        }
        let leg = &plan.legs[0];
        let (s_path, t_path) = self.graph.lca_paths(leg.src, leg.tgt);
        let top = if s_path.len() == 1 || t_path.len() == 1 {
            *s_path.last().expect("paths are never empty")
        } else {
            s_path[s_path.len() - 2]
        };
        let mut set: HashSet<VertexId> = self
            .active_leaves_rooted(top)
            .into_iter()
            .flat_map(|leaf| {
                let mut chain = Vec::new();
                let mut cur = leaf;
                loop {
                    chain.push(cur);
                    if cur == top {
                        break;
                    }
                    match self.graph.vertex(cur).parent() {
                        Some(p) => cur = p,
                        None => break,
                    }
                }
                chain
            })
            .collect();
        set.insert(top);
        set
    }
}
