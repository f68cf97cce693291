//! The `PipelineStage` capability and the execution context the engine
//! hands a stage on every call. Stages are opaque: the engine never looks
//! inside one, whether it is hand-written or emitted by a JIT/codegen
//! backend. This crate only fixes the `setup`/`execute`/`stop` contract
//! (spec component C) and the ambient state a call can reach through
//! (spec's `PipelineExecutionContext`).

mod context;
mod operator_handler;
mod stage;

pub use context::{EmitPolicy, PipelineExecutionContext, WorkerThreadId};
pub use operator_handler::OperatorHandler;
pub use stage::{fn_stage, BoxedStage, FnStage, PipelineStage, StageError};
