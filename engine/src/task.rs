use std::sync::Weak;

use nebula_unsafe_collection::{OriginId, TupleBuffer};

use crate::{
    ids::QueryId,
    node::{DrainingNode, RunningQueryPlanNode},
    plan::InstantiatedQueryPlan,
    source::RunningSource,
};

pub type OnComplete = Box<dyn FnOnce() + Send>;
pub type OnFailure = Box<dyn FnOnce(Box<dyn std::error::Error + Send + Sync>) + Send>;

/// The closed set of operations the worker pool dispatches (spec §3). Every
/// task carries continuations the dispatching worker invokes after running
/// it: `on_complete` on success, `on_failure` if the dispatch itself
/// raised an error.
pub enum Task {
    ExecuteTask {
        query_id: QueryId,
        node: Weak<RunningQueryPlanNode>,
        buffer: TupleBuffer,
        on_complete: OnComplete,
        on_failure: OnFailure,
    },
    SetupPipeline {
        query_id: QueryId,
        node: Weak<RunningQueryPlanNode>,
        on_complete: OnComplete,
        on_failure: OnFailure,
    },
    /// Owns the node being drained -- this is the `nodeOwned` member spec.md
    /// §3 describes: ownership guarantees the node outlives its own
    /// termination call.
    StopPipeline {
        query_id: QueryId,
        node: DrainingNode,
        on_complete: OnComplete,
        on_failure: OnFailure,
    },
    StopSource {
        query_id: QueryId,
        origin: OriginId,
        source: Weak<RunningSource>,
        on_complete: OnComplete,
    },
    FailSource {
        query_id: QueryId,
        origin: OriginId,
        source: Weak<RunningSource>,
        error: Box<dyn std::error::Error + Send + Sync>,
        on_complete: OnComplete,
    },
    StartQuery {
        query_id: QueryId,
        plan: InstantiatedQueryPlan,
    },
    TerminateQuery {
        query_id: QueryId,
    },
}

impl Task {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Task::ExecuteTask { .. } => "execute",
            Task::SetupPipeline { .. } => "setup",
            Task::StopPipeline { .. } => "stop_pipeline",
            Task::StopSource { .. } => "stop_source",
            Task::FailSource { .. } => "fail_source",
            Task::StartQuery { .. } => "start_query",
            Task::TerminateQuery { .. } => "terminate_query",
        }
    }

    pub(crate) fn query_id(&self) -> QueryId {
        match self {
            Task::ExecuteTask { query_id, .. }
            | Task::SetupPipeline { query_id, .. }
            | Task::StopPipeline { query_id, .. }
            | Task::StopSource { query_id, .. }
            | Task::FailSource { query_id, .. }
            | Task::StartQuery { query_id, .. }
            | Task::TerminateQuery { query_id, .. } => *query_id,
        }
    }
}
