use std::sync::Arc;

use nebula_service::{EmitPolicy, OperatorHandler, PipelineExecutionContext, WorkerThreadId};
use nebula_unsafe_collection::{BufferManager, ShutdownError, TupleBuffer};

use crate::{emitter::WorkEmitter, ids::QueryId, node::RunningQueryPlanNode, stats::StatisticsListener};

/// The one `PipelineExecutionContext` implementation the engine ever
/// constructs; which task kind created it determines its `EmitPolicy`
/// (spec component D / `nebula-service`'s [`EmitPolicy`] doc comment
/// explains why a single parameterized struct replaces the original
/// engine's three subclasses).
pub struct ExecutionContext {
    worker_thread_id: WorkerThreadId,
    query_id: QueryId,
    buffer_manager: Arc<BufferManager>,
    operator_handlers: Vec<Arc<dyn OperatorHandler>>,
    successors: Vec<Arc<RunningQueryPlanNode>>,
    emitter: Arc<dyn WorkEmitter>,
    policy: EmitPolicy,
    stats: Arc<StatisticsListener>,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_thread_id: WorkerThreadId,
        query_id: QueryId,
        buffer_manager: Arc<BufferManager>,
        operator_handlers: Vec<Arc<dyn OperatorHandler>>,
        successors: Vec<Arc<RunningQueryPlanNode>>,
        emitter: Arc<dyn WorkEmitter>,
        policy: EmitPolicy,
        stats: Arc<StatisticsListener>,
    ) -> Self {
        Self {
            worker_thread_id,
            query_id,
            buffer_manager,
            operator_handlers,
            successors,
            emitter,
            policy,
            stats,
        }
    }
}

impl PipelineExecutionContext for ExecutionContext {
    fn worker_thread_id(&self) -> WorkerThreadId {
        self.worker_thread_id
    }

    fn allocate_tuple_buffer(&self) -> Result<TupleBuffer, ShutdownError> {
        self.buffer_manager.get_buffer_blocking()
    }

    fn operator_handlers(&self) -> &[Arc<dyn OperatorHandler>] {
        &self.operator_handlers
    }

    fn emit_buffer(&mut self, buffer: TupleBuffer) {
        match self.policy {
            EmitPolicy::Forbidden => {
                panic!("stage for query {} emitted a buffer during setup, which is forbidden", self.query_id);
            }
            EmitPolicy::Normal => {
                self.stats.record_buffer_emitted();
                crate::emitter::fan_out_to_successors(self.emitter.as_ref(), self.query_id, &self.successors, buffer, false);
            }
            EmitPolicy::KeepAliveOnEmit => {
                self.stats.record_buffer_emitted();
                crate::emitter::fan_out_to_successors(self.emitter.as_ref(), self.query_id, &self.successors, buffer, true);
            }
        }
    }

    fn emit_policy(&self) -> EmitPolicy {
        self.policy
    }
}
