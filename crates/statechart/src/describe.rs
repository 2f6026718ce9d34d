//! Renderer-facing description of a graph.
//!
//! The engine emits no graphical output itself; a renderer iterates the
//! description and draws from it. Hooks appear as presence flags only.

use crate::graph::{StateGraph, VertexKind};
use crate::transition::{TransitionKind, Trigger};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexDescription {
    pub id: u32,
    pub name: Option<String>,
    pub kind: VertexKind,
    pub parent: Option<u32>,
    pub initial: Option<u32>,
    pub children: Vec<u32>,
    pub has_entry: bool,
    pub has_exit: bool,
    pub has_do: bool,
    pub timeout_ms: Option<u64>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDescription {
    Completion,
    Event,
    Timeout,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDescription {
    pub source: u32,
    /// Absent target loops back to the source.
    pub target: Option<u32>,
    pub kind: TransitionKind,
    pub trigger: TriggerDescription,
    pub label: Option<String>,
    pub has_guard: bool,
    pub has_action: bool,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDescription {
    pub root: u32,
    pub vertices: Vec<VertexDescription>,
    pub transitions: Vec<TransitionDescription>,
}

impl<E> StateGraph<E> {
    pub fn describe(&self) -> GraphDescription {
        let vertices = self
            .vertices()
            .map(|v| VertexDescription {
                id: v.id().0,
                name: v.name().map(str::to_string),
                kind: v.kind(),
                parent: v.parent().map(|p| p.0),
                initial: v.initial().map(|i| i.0),
                children: v.children().iter().map(|c| c.0).collect(),
                has_entry: v.entry.is_some(),
                has_exit: v.exit.is_some(),
                has_do: v.do_activity.is_some(),
                timeout_ms: v.timeout().map(|d| d.as_millis() as u64),
            })
            .collect();
        let transitions = self
            .transitions()
            .map(|(_, t)| TransitionDescription {
                source: t.source().0,
                target: t.target().map(|v| v.0),
                kind: t.kind(),
                trigger: match t.trigger() {
                    Trigger::Completion => TriggerDescription::Completion,
                    Trigger::Event(_) => TriggerDescription::Event,
                    Trigger::Timeout => TriggerDescription::Timeout,
                },
                label: t.label().map(str::to_string),
                has_guard: t.has_guard(),
                has_action: t.has_action(),
            })
            .collect();
        GraphDescription {
            root: self.root().0,
            vertices,
            transitions,
        }
    }
}
