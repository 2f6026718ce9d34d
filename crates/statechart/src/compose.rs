//! Reuse of graphs as building blocks: deep-clone attachment and masking.
//!
//! A template graph is never shared between machines; attaching it clones
//! every vertex and transition into the host arena with fresh ids, so the
//! clone preserves semantics but not identity. Masking is a construction-time
//! structural edit: the named child subtree disappears together with every
//! transition touching it, and the composite is re-checked afterwards.

use std::collections::{HashMap, HashSet};

use crate::error::StructuralError;
use crate::graph::{StateGraph, VertexId, VertexKind};
use crate::transition::{Transition, TransitionId};

impl<E> StateGraph<E> {
    /// Deep-clone `template` under `parent`. Returns the id of the cloned
    /// template root.
    pub fn attach(&mut self, parent: VertexId, template: &StateGraph<E>) -> VertexId {
        let order = template.preorder();
        let mut map: HashMap<VertexId, VertexId> = HashMap::with_capacity(order.len());
        for v in order.iter().copied() {
            let tv = template.vertex(v);
            let new_parent = match tv.parent() {
                None => Some(parent),
                Some(p) => map.get(&p).copied(),
            };
            let id = self.add_vertex(tv.kind(), tv.name().map(str::to_string), new_parent, false);
            {
                let nv = self.vertex_mut(id);
                nv.entry = tv.entry.clone();
                nv.exit = tv.exit.clone();
                nv.do_activity = tv.do_activity.clone();
                nv.timeout = tv.timeout();
            }
            map.insert(v, id);
        }
        // Initial designations carry over by id translation.
        for v in order.iter().copied() {
            if let Some(i) = template.vertex(v).initial() {
                if let (Some(&nv), Some(&ni)) = (map.get(&v), map.get(&i)) {
                    self.vertex_mut(nv).initial = Some(ni);
                }
            }
        }
        for (_, t) in template.transitions() {
            let Some(&source) = map.get(&t.source()) else {
                continue;
            };
            let target = match t.target() {
                Some(old) => match map.get(&old) {
                    Some(&new) => Some(new),
                    None => continue,
                },
                None => None,
            };
            let id = TransitionId(self.transitions.len() as u32);
            self.transitions.push(Transition {
                source,
                target,
                trigger: t.trigger().clone(),
                guard: t.guard.clone(),
                action: t.action.clone(),
                kind: t.kind(),
                label: t.label().map(str::to_string),
                alive: true,
            });
            self.vertex_mut(source).outgoing.push(id);
        }
        map[&template.root()]
    }

    /// Deep-clone `template` under `parent` and give the cloned root a name.
    pub fn attach_as(
        &mut self,
        parent: VertexId,
        name: impl Into<String>,
        template: &StateGraph<E>,
    ) -> VertexId {
        let id = self.attach(parent, template);
        self.vertex_mut(id).name = Some(name.into());
        id
    }

    /// Remove the child of `composite` named `name`, along with its subtree
    /// and every transition whose source or target fell inside it. The
    /// composite must still present an initial substate afterwards, and if it
    /// had final states before, at least one must remain reachable.
    pub fn mask(&mut self, composite: VertexId, name: &str) -> Result<(), StructuralError> {
        let victim = self
            .child_by_name(composite, name)
            .ok_or_else(|| StructuralError::UnknownChild(self.label(composite), name.to_string()))?;
        let had_final = self
            .vertex(composite)
            .children()
            .iter()
            .any(|&c| self.vertex(c).kind() == VertexKind::Final);
        let removed: HashSet<VertexId> = self.subtree(victim).into_iter().collect();

        self.vertex_mut(composite).children.retain(|&c| c != victim);
        if let Some(i) = self.vertex(composite).initial() {
            if removed.contains(&i) {
                self.vertex_mut(composite).initial = None;
            }
        }
        for &v in &removed {
            self.vertex_mut(v).alive = false;
        }
        for t in self.transitions.iter_mut() {
            if !t.alive {
                continue;
            }
            let touches = removed.contains(&t.source)
                || t.target.map_or(false, |tgt| removed.contains(&tgt));
            if touches {
                t.alive = false;
            }
        }
        let transitions = &self.transitions;
        for v in self.vertices.iter_mut().filter(|v| v.alive) {
            v.outgoing.retain(|t| transitions[t.index()].alive);
        }

        let composite_v = self.vertex(composite);
        if !composite_v.children().is_empty() && composite_v.initial().is_none() {
            return Err(StructuralError::MissingInitial(self.label(composite)));
        }
        if had_final {
            self.check_final_reachability(composite)?;
        }
        Ok(())
    }

    /// Remove a labeled transition sourced inside `composite`'s subtree.
    pub fn mask_transition(
        &mut self,
        composite: VertexId,
        label: &str,
    ) -> Result<(), StructuralError> {
        let subtree: HashSet<VertexId> = self.subtree(composite).into_iter().collect();
        let found = self
            .transitions()
            .find(|(_, t)| subtree.contains(&t.source()) && t.label() == Some(label))
            .map(|(id, _)| id);
        let id = found.ok_or_else(|| {
            StructuralError::UnknownChild(self.label(composite), label.to_string())
        })?;
        self.transitions[id.index()].alive = false;
        for v in self.vertices.iter_mut().filter(|v| v.alive) {
            v.outgoing.retain(|&t| t != id);
        }
        Ok(())
    }
}
