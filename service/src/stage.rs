use std::{fmt, sync::Arc};

use nebula_unsafe_collection::TupleBuffer;

use crate::context::PipelineExecutionContext;

/// Failure raised from inside `setup`/`execute`/`stop`. The engine treats
/// this as opaque payload: it is handed to the query's status listener and
/// drives the lifecycle transition to `Terminated{Failed}` (spec §4.D, §7),
/// never inspected or matched on by the engine itself.
pub struct StageError(Box<dyn std::error::Error + Send + Sync>);

impl StageError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    pub fn msg(text: impl Into<String>) -> Self {
        Self(Box::new(Message(text.into())))
    }
}

struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Message {}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// The opaque operator-chain capability (spec component C). A compiled
/// pipeline -- hand-written or emitted by a JIT/codegen backend -- exposes
/// only this surface; the engine never looks past it.
///
/// `setup` is called exactly once before any `execute`, and must not emit
/// (the context enforces this via [`crate::EmitPolicy::Forbidden`]).
/// `execute` runs many times, once per input buffer, and may emit any
/// number of output buffers. `stop` runs exactly once after the last
/// `execute` returns and may emit final buffers during drain.
pub trait PipelineStage: Send + Sync {
    fn setup(&self, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        let _ = ctx;
        Ok(())
    }

    fn execute(&self, buf: TupleBuffer, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError>;

    fn stop(&self, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        let _ = ctx;
        Ok(())
    }
}

/// The shared-ownership form the engine stores a compiled pipeline as: a
/// `RunningQueryPlanNode` owns one of these, successors hold their own
/// clone of the `Arc`.
pub type BoxedStage = Arc<dyn PipelineStage>;

/// Wraps a plain closure as a [`PipelineStage`] whose `setup`/`stop` are
/// no-ops, the way the teacher's `fn_service` turns a bare async closure
/// into a full `Service`. Handy for tests and for trivial stages (filters,
/// maps) that don't need operator-handler state.
pub struct FnStage<F>(F);

impl<F> PipelineStage for FnStage<F>
where
    F: Fn(TupleBuffer, &mut dyn PipelineExecutionContext) -> Result<(), StageError> + Send + Sync,
{
    fn execute(&self, buf: TupleBuffer, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        (self.0)(buf, ctx)
    }
}

pub fn fn_stage<F>(f: F) -> FnStage<F>
where
    F: Fn(TupleBuffer, &mut dyn PipelineExecutionContext) -> Result<(), StageError> + Send + Sync,
{
    FnStage(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullCtx;

    impl PipelineExecutionContext for NullCtx {
        fn worker_thread_id(&self) -> crate::WorkerThreadId {
            crate::WorkerThreadId(0)
        }

        fn allocate_tuple_buffer(&self) -> Result<TupleBuffer, nebula_unsafe_collection::ShutdownError> {
            unimplemented!("not exercised in this test")
        }

        fn operator_handlers(&self) -> &[Arc<dyn crate::OperatorHandler>] {
            &[]
        }

        fn emit_buffer(&mut self, _buffer: TupleBuffer) {}

        fn emit_policy(&self) -> crate::EmitPolicy {
            crate::EmitPolicy::Normal
        }
    }

    #[test]
    fn fn_stage_invokes_closure_on_execute() {
        let calls = AtomicUsize::new(0);
        let stage = fn_stage(|_buf, _ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let pool = nebula_unsafe_collection::BufferManager::new(nebula_unsafe_collection::PoolConfig {
            buffer_size: 16,
            pool_capacity: 1,
        });
        let buf = pool.get_buffer_blocking().unwrap();

        let mut ctx = NullCtx;
        stage.execute(buf, &mut ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
