#![doc = r#"# statechart

A hierarchical state machine interpreter with run-to-completion semantics.
Graphs combine composite and parallel states, initial/final/terminate
pseudostates, junctions, shallow and deep history, guarded and timed
transitions. A dedicated consumer thread drives the configuration from an
externally posted event stream; each event is processed to quiescence before
the next one is taken.

## Module Overview
- [`graph`]      – vertex arena, parent/child structure, LCA queries.
- [`transition`] – triggers, guards, actions and the fluent transition spec.
- [`builder`]    – chain DSL for associating states and transitions.
- [`compose`]    – deep-clone attachment of template graphs and masking.
- [`machine`]    – machine handle, event loop, timers, lifecycle.
- [`describe`]   – renderer-facing graph description (optional serde).

## Example

```rust
use statechart::{StateMachine, StateGraph};
use std::time::Duration;

let mut g: StateGraph<&'static str> = StateGraph::new();
let idle = g.state("Idle");
let busy = g.state("Busy");
let done = g.final_in(g.root());
g.chain(idle).via("work").to(busy).via("finish").to(done);
g.set_initial(g.root(), idle);

let machine = StateMachine::new(g);
machine.start().unwrap();
machine.post("work").unwrap();
machine.post("finish").unwrap();
assert!(machine.join(Duration::from_secs(1)));
```
"#]

pub mod builder;
pub mod compose;
mod context;
pub mod describe;
pub mod error;
mod execute;
pub mod graph;
pub mod machine;
mod queue;
mod select;
mod timer;
pub mod transition;
mod validate;

pub use builder::{Chain, ChainSpec, VertexHandle};
pub use context::{ActionFn, DoHookFn, DoToken, GuardFn, MachineContext, StateHook, TriggerFn};
pub use describe::{GraphDescription, TransitionDescription, TriggerDescription, VertexDescription};
pub use error::{HookError, PostError, StructuralError};
pub use graph::{StateGraph, Vertex, VertexId, VertexKind};
pub use machine::StateMachine;
pub use transition::{Transition, TransitionId, TransitionKind, TransitionSpec, Trigger};

#[cfg(test)]
mod tests;
