use nebula_unsafe_collection::{ShutdownError, TupleBuffer};

use crate::operator_handler::OperatorHandler;

/// Identity of the worker thread currently executing a pipeline call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WorkerThreadId(pub usize);

/// Governs what a call to [`PipelineExecutionContext::emit_buffer`] is
/// allowed to do, and how the engine schedules the resulting downstream
/// work. A single `ExecutionContext` implementation in `nebula-engine`
/// picks one of these per task kind, replacing the original engine's three
/// separate `PipelineExecutionContext` subclasses (`TaskPEC`/`SetupPEC`/
/// `TerminationPEC`) with one struct parameterized by this enum -- see
/// DESIGN.md.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EmitPolicy {
    /// `setup` may not emit. Attempting to do so is a stage bug, not a
    /// recoverable runtime condition (spec component D, step 2).
    Forbidden,
    /// `execute` may emit freely; every successor gets one `ExecuteTask`.
    Normal,
    /// `stop` may emit; the task the engine schedules for each successor
    /// captures a strong reference to that successor so it outlives its
    /// own drain (spec component D, step 4).
    KeepAliveOnEmit,
}

/// The ambient state a [`crate::PipelineStage`] receives on every call
/// (spec's `PipelineExecutionContext`). Lifetime is strictly scoped to one
/// `setup`/`execute`/`stop` invocation; the engine constructs a fresh one
/// per task.
pub trait PipelineExecutionContext {
    fn worker_thread_id(&self) -> WorkerThreadId;

    /// Blocking allocation from the engine's shared buffer manager. Only
    /// fails during engine shutdown.
    fn allocate_tuple_buffer(&self) -> Result<TupleBuffer, ShutdownError>;

    /// Operator-handler state owned by this pipeline stage, opaque to the
    /// engine.
    fn operator_handlers(&self) -> &[std::sync::Arc<dyn OperatorHandler>];

    /// Deliver `buffer` downstream. Whether this is allowed, and what
    /// happens to `buffer` if it is not, is governed by [`EmitPolicy`];
    /// implementations must honor the policy they were constructed with.
    fn emit_buffer(&mut self, buffer: TupleBuffer);

    fn emit_policy(&self) -> EmitPolicy;
}
