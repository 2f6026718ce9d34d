//! Well-formedness checks run when a machine starts and after masking.

use std::collections::HashSet;

use crate::error::StructuralError;
use crate::graph::{StateGraph, VertexId, VertexKind};
use crate::transition::{TransitionKind, Trigger};

impl<E> StateGraph<E> {
    /// Check the whole graph. The first construction defect recorded during
    /// assembly is reported before any structural rule.
    pub fn validate(&self) -> Result<(), StructuralError> {
        if let Some(defect) = self.defects.first() {
            return Err(defect.clone());
        }
        for v in self.preorder() {
            self.check_vertex(v)?;
        }
        for (_, t) in self.transitions() {
            let source = t.source();
            let target = t.target().unwrap_or(source);
            if matches!(t.trigger(), Trigger::Timeout) && self.vertex(source).timeout().is_none() {
                return Err(StructuralError::TimeoutWithoutDelay(self.label(source)));
            }
            if t.kind() == TransitionKind::External && source != target {
                let lca = self.lca(source, target);
                if self.vertex(lca).kind() == VertexKind::Parallel {
                    return Err(StructuralError::CrossRegionTransition(
                        self.label(source),
                        self.label(target),
                    ));
                }
            }
        }
        for v in self.preorder() {
            let vertex = self.vertex(v);
            if vertex.children().iter().any(|&c| self.vertex(c).kind().is_history()) {
                self.check_final_reachability(v)?;
            }
        }
        Ok(())
    }

    fn check_vertex(&self, v: VertexId) -> Result<(), StructuralError> {
        let vertex = self.vertex(v);
        match vertex.kind() {
            VertexKind::Simple => Ok(()),
            VertexKind::Composite => {
                if !vertex.children().is_empty() {
                    let initial = vertex
                        .initial()
                        .ok_or_else(|| StructuralError::MissingInitial(self.label(v)))?;
                    let kind = self.vertex(initial).kind();
                    if !vertex.children().contains(&initial)
                        || (kind.is_pseudostate() && kind != VertexKind::Initial)
                    {
                        return Err(StructuralError::MissingInitial(self.label(v)));
                    }
                }
                let histories = vertex
                    .children()
                    .iter()
                    .filter(|&&c| self.vertex(c).kind().is_history())
                    .count();
                if histories > 1 {
                    return Err(StructuralError::DuplicateHistory(self.label(v)));
                }
                Ok(())
            }
            VertexKind::Parallel => {
                let regions: Vec<_> = vertex
                    .children()
                    .iter()
                    .copied()
                    .filter(|&c| self.vertex(c).kind() != VertexKind::DeepHistory)
                    .collect();
                if regions.len() < 2 {
                    return Err(StructuralError::ParallelRegions(self.label(v)));
                }
                for r in regions {
                    if self.vertex(r).kind().is_pseudostate() {
                        return Err(StructuralError::PseudostateRegion(self.label(v)));
                    }
                }
                if vertex.initial().is_some() {
                    return Err(StructuralError::InitialInParallel(self.label(v)));
                }
                Ok(())
            }
            VertexKind::Initial => {
                let parent = vertex.parent().unwrap_or_else(|| self.root());
                let ok = vertex.outgoing().len() == 1 && {
                    let t = self.transition(vertex.outgoing()[0]);
                    matches!(t.trigger(), Trigger::Completion) && !t.has_guard()
                };
                if ok {
                    Ok(())
                } else {
                    Err(StructuralError::MalformedInitial(self.label(parent)))
                }
            }
            VertexKind::Junction => {
                if vertex.outgoing().is_empty() {
                    return Err(StructuralError::JunctionNoOutgoing(self.label(v)));
                }
                let mut elses = 0;
                for &t in vertex.outgoing() {
                    let t = self.transition(t);
                    if !matches!(t.trigger(), Trigger::Completion) {
                        return Err(StructuralError::TriggeredJunctionBranch(self.label(v)));
                    }
                    if t.target().is_none() {
                        return Err(StructuralError::JunctionBranchWithoutTarget(self.label(v)));
                    }
                    if !t.has_guard() {
                        elses += 1;
                    }
                }
                if elses > 1 {
                    return Err(StructuralError::JunctionMultipleElse(self.label(v)));
                }
                Ok(())
            }
            VertexKind::ShallowHistory | VertexKind::DeepHistory => {
                let parent = vertex.parent().unwrap_or_else(|| self.root());
                if vertex.kind() == VertexKind::ShallowHistory
                    && self.vertex(parent).kind() == VertexKind::Parallel
                {
                    return Err(StructuralError::HistoryInParallel(self.label(parent)));
                }
                if vertex.outgoing().len() > 1 {
                    return Err(StructuralError::MalformedHistoryDefault(self.label(parent)));
                }
                if let Some(&t) = vertex.outgoing().first() {
                    let t = self.transition(t);
                    if !matches!(t.trigger(), Trigger::Completion) || t.has_guard() {
                        return Err(StructuralError::MalformedHistoryDefault(self.label(parent)));
                    }
                }
                Ok(())
            }
            VertexKind::Final | VertexKind::Terminate => {
                if vertex.outgoing().is_empty() {
                    Ok(())
                } else {
                    Err(StructuralError::SinkSource(self.label(v)))
                }
            }
        }
    }

    /// All vertices of the subtree rooted at `v`, the root included.
    pub(crate) fn subtree(&self, v: VertexId) -> Vec<VertexId> {
        let mut out = Vec::new();
        let mut stack = vec![v];
        while let Some(x) = stack.pop() {
            out.push(x);
            stack.extend(self.vertex(x).children().iter().copied());
        }
        out
    }

    /// A composite that records history must still be able to reach one of
    /// its final states, otherwise a restored configuration can never
    /// complete. Reachability follows transitions inside the subtree plus
    /// substate descent from each reached state.
    pub(crate) fn check_final_reachability(&self, composite: VertexId) -> Result<(), StructuralError> {
        let finals: Vec<_> = self
            .vertex(composite)
            .children()
            .iter()
            .copied()
            .filter(|&c| self.vertex(c).kind() == VertexKind::Final)
            .collect();
        if finals.is_empty() {
            return Ok(());
        }
        let subtree: HashSet<_> = self.subtree(composite).into_iter().collect();
        let mut seeds = Vec::new();
        if let Some(initial) = self.vertex(composite).initial() {
            match self.vertex(initial).kind() {
                VertexKind::Initial => {
                    if let Some(&t) = self.vertex(initial).outgoing().first() {
                        if let Some(target) = self.transition(t).target() {
                            seeds.push(target);
                        }
                    }
                }
                _ => seeds.push(initial),
            }
        }
        for &c in self.vertex(composite).children() {
            if self.vertex(c).kind().is_history() {
                if let Some(&t) = self.vertex(c).outgoing().first() {
                    if let Some(target) = self.transition(t).target() {
                        seeds.push(target);
                    }
                }
            }
        }
        let mut seen: HashSet<VertexId> = HashSet::new();
        let mut stack = seeds;
        while let Some(v) = stack.pop() {
            if !subtree.contains(&v) || !seen.insert(v) {
                continue;
            }
            for &t in self.vertex(v).outgoing() {
                if let Some(target) = self.transition(t).target() {
                    stack.push(target);
                }
            }
            stack.extend(self.vertex(v).children().iter().copied());
        }
        if finals.iter().any(|f| seen.contains(f)) {
            Ok(())
        } else {
            Err(StructuralError::UnreachableFinal(self.label(composite)))
        }
    }
}
