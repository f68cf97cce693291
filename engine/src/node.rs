use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use nebula_service::{BoxedStage, OperatorHandler};
use tracing::debug;

use crate::{emitter::WorkEmitter, ids::QueryId};

/// Counts the combined strong references of every node and source in one
/// query's graph. `onRunning`/`onDestruction` (spec §4.D) need to know when
/// the *entire* graph -- not just one node -- has dropped, so
/// `RunningQueryPlanNode` and `RunningSource` each hold one of these and
/// release it exactly once as they drop.
pub(crate) struct GraphTracker {
    remaining: AtomicUsize,
    on_destruction: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl GraphTracker {
    pub(crate) fn new(initial: usize, on_destruction: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(initial),
            on_destruction: StdMutex::new(Some(Box::new(on_destruction))),
        })
    }

    pub(crate) fn release(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(f) = self.on_destruction.lock().unwrap().take() {
                f();
            }
        }
    }
}

struct NodeBundle {
    stage: BoxedStage,
    successors: Vec<Arc<RunningQueryPlanNode>>,
    operator_handlers: Vec<Arc<dyn OperatorHandler>>,
}

/// A live pipeline stage inside a running query (spec component D). The
/// engine holds the single strong reference created at start; every queued
/// task captures only a [`std::sync::Weak`] to it. When the last strong
/// reference drops -- source closed and all in-flight tasks completed --
/// `Drop` fires exactly once and schedules the node's `StopPipeline` task,
/// handing the node's own guts over as a [`DrainingNode`] (the `nodeOwned`
/// member of spec.md §3's `StopPipeline` task).
pub struct RunningQueryPlanNode {
    query_id: QueryId,
    bundle: parking_lot::Mutex<Option<NodeBundle>>,
    emitter: Arc<dyn WorkEmitter>,
    tracker: Arc<GraphTracker>,
}

impl RunningQueryPlanNode {
    pub(crate) fn new(
        query_id: QueryId,
        stage: BoxedStage,
        successors: Vec<Arc<RunningQueryPlanNode>>,
        operator_handlers: Vec<Arc<dyn OperatorHandler>>,
        emitter: Arc<dyn WorkEmitter>,
        tracker: Arc<GraphTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            query_id,
            bundle: parking_lot::Mutex::new(Some(NodeBundle {
                stage,
                successors,
                operator_handlers,
            })),
            emitter,
            tracker,
        })
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn stage(&self) -> BoxedStage {
        self.bundle
            .lock()
            .as_ref()
            .expect("stage accessed after node entered termination")
            .stage
            .clone()
    }

    pub fn successors(&self) -> Vec<Arc<RunningQueryPlanNode>> {
        self.bundle
            .lock()
            .as_ref()
            .expect("successors accessed after node entered termination")
            .successors
            .clone()
    }

    pub fn operator_handlers(&self) -> Vec<Arc<dyn OperatorHandler>> {
        self.bundle
            .lock()
            .as_ref()
            .expect("operator handlers accessed after node entered termination")
            .operator_handlers
            .clone()
    }
}

impl Drop for RunningQueryPlanNode {
    fn drop(&mut self) {
        if let Some(bundle) = self.bundle.get_mut().take() {
            debug!(query_id = %self.query_id, "running query plan node draining");
            let node = DrainingNode {
                query_id: self.query_id,
                stage: bundle.stage,
                successors: bundle.successors,
                operator_handlers: bundle.operator_handlers,
            };
            let on_complete: crate::task::OnComplete = Box::new(|| {});
            let on_failure: crate::task::OnFailure = Box::new(|_err| {});
            self.emitter.emit_stop(self.query_id, node, on_complete, on_failure);
        }
        self.tracker.release();
    }
}

/// The node's contents, owned outright, moving through its `StopPipeline`
/// task. Produced exactly once, by [`RunningQueryPlanNode`]'s `Drop`.
pub struct DrainingNode {
    pub query_id: QueryId,
    pub stage: BoxedStage,
    pub successors: Vec<Arc<RunningQueryPlanNode>>,
    pub operator_handlers: Vec<Arc<dyn OperatorHandler>>,
}
