use std::sync::{Arc, Weak};

use nebula_service::OperatorHandler;
use nebula_unsafe_collection::{OriginId, TupleBuffer};

use crate::{
    ids::QueryId,
    node::{DrainingNode, RunningQueryPlanNode},
    source::RunningSource,
    task::{OnComplete, OnFailure},
};

/// API pipelines and sources use to enqueue follow-up work (spec component
/// F). Every method wraps one [`crate::task::Task`] variant into the
/// engine's task queue; none of them block except indirectly through the
/// buffer manager a stage might call into first.
pub trait WorkEmitter: Send + Sync {
    fn emit_work(
        &self,
        query_id: QueryId,
        node: Weak<RunningQueryPlanNode>,
        buffer: TupleBuffer,
        on_complete: OnComplete,
        on_failure: OnFailure,
    );

    fn emit_setup(&self, query_id: QueryId, node: Weak<RunningQueryPlanNode>, on_complete: OnComplete, on_failure: OnFailure);

    fn emit_stop(&self, query_id: QueryId, node: DrainingNode, on_complete: OnComplete, on_failure: OnFailure);

    fn initialize_source_stop(&self, query_id: QueryId, origin: OriginId, source: Weak<RunningSource>);

    fn initialize_source_failure(
        &self,
        query_id: QueryId,
        origin: OriginId,
        source: Weak<RunningSource>,
        error: Box<dyn std::error::Error + Send + Sync>,
    );
}

/// Helper every `RunningQueryPlanNode` keeps alongside its `WorkEmitter` so
/// it can translate `ctx.emit_buffer` calls into one `ExecuteTask` per
/// successor (spec component D, step 3 and step 4).
pub(crate) fn fan_out_to_successors(
    emitter: &dyn WorkEmitter,
    query_id: QueryId,
    successors: &[Arc<RunningQueryPlanNode>],
    buffer: TupleBuffer,
    keep_alive: bool,
) {
    for successor in successors {
        let weak = Arc::downgrade(successor);
        // Capturing a strong clone in the completion closure is what keeps
        // a successor alive through its own drain even though the
        // `RunningQueryPlan` no longer holds a strong reference to it
        // (spec component D, step 4 "emit keeps successors alive via
        // closure capture").
        let keep_alive_guard = keep_alive.then(|| successor.clone());
        let on_complete: OnComplete = Box::new(move || {
            drop(keep_alive_guard);
        });
        let on_failure: OnFailure = Box::new(|_err| {});
        emitter.emit_work(query_id, weak, buffer.clone(), on_complete, on_failure);
    }
}

#[allow(unused)]
pub(crate) fn noop_handlers() -> Vec<Arc<dyn OperatorHandler>> {
    Vec::new()
}
