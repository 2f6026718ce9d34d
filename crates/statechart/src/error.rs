//! Error types for graph construction, validation and runtime faults.

use thiserror::Error;

/// Raised when the state graph violates well-formedness rules, either while
/// assembling it, when the machine starts, or during a run-to-completion
/// step (junction deadlock, pseudostate cycle).
///
/// Construction defects detected inside fluent builder calls are recorded on
/// the graph and surface as the first error returned by validation, so that
/// chained graph assembly never has to thread `Result` values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("machine already started")]
    AlreadyStarted,
    #[error("graph is frozen once the machine has started")]
    Frozen,
    #[error("{0} already has a parent")]
    ParentConflict(String),
    #[error("{0} already has an initial substate")]
    InitialConflict(String),
    #[error("composite {0} has children but no initial substate")]
    MissingInitial(String),
    #[error("initial pseudostate of {0} must have exactly one untriggered, unguarded transition")]
    MalformedInitial(String),
    #[error("{0} cannot be the source of a transition")]
    SinkSource(String),
    #[error("an initial pseudostate cannot be the target of a transition")]
    TargetIsInitial,
    #[error("junction {0} has no outgoing transitions")]
    JunctionNoOutgoing(String),
    #[error("junction {0}: no branch guard satisfied and no else branch")]
    JunctionDeadlock(String),
    #[error("junction {0} has more than one else branch")]
    JunctionMultipleElse(String),
    #[error("junction {0} branch needs a target")]
    JunctionBranchWithoutTarget(String),
    #[error("junction {0} only supports guarded branches, not triggers")]
    TriggeredJunctionBranch(String),
    #[error("cycle in pseudostate chain through {0}")]
    PseudostateCycle(String),
    #[error("parallel state {0} needs at least two region children")]
    ParallelRegions(String),
    #[error("pseudostate cannot be a region of parallel state {0}")]
    PseudostateRegion(String),
    #[error("regions of parallel state {0} cannot be marked initial")]
    InitialInParallel(String),
    #[error("shallow history cannot live directly inside parallel state {0}")]
    HistoryInParallel(String),
    #[error("composite {0} has more than one history pseudostate")]
    DuplicateHistory(String),
    #[error("history default of {0} must be a single untriggered, unguarded transition")]
    MalformedHistoryDefault(String),
    #[error("transition from {0} to {1} crosses orthogonal regions")]
    CrossRegionTransition(String, String),
    #[error("conflicting timeout declared for {0}")]
    ConflictingTimeout(String),
    #[error("timeout declared on pseudostate {0}")]
    TimeoutOnPseudostate(String),
    #[error("timeout transition from {0} but the state declares no timeout")]
    TimeoutWithoutDelay(String),
    #[error("no final state of {0} remains reachable")]
    UnreachableFinal(String),
    #[error("{0} has no child named {1:?}")]
    UnknownChild(String, String),
    #[error("internal transition from {0} cannot have a distinct target")]
    InternalWithTarget(String),
}

/// Failure reported by a user-supplied guard, action, entry, exit or
/// do-activity hook.
///
/// A faulting hook never brings the machine down: a faulting guard counts as
/// false, a faulting behavior is skipped, and the run-to-completion step
/// carries on. A diagnostic is emitted in both cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<&str> for HookError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HookError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

/// Error returned by `post` once the machine has stopped or terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PostError {
    #[error("event queue is closed")]
    Closed,
}
