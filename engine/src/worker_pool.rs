use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nebula_service::{EmitPolicy, WorkerThreadId};
use nebula_unsafe_collection::BufferManager;
use tracing::error;

use crate::{
    context::ExecutionContext,
    emitter::WorkEmitter,
    engine::{QueryEngine, QueryRegistry},
    error::RuntimeError,
    lifecycle::QueryLifecycle,
    listener::{SourceTermination, StatusListener},
    plan::RunningQueryPlan,
    stats::StatisticsListener,
    task::{OnComplete, OnFailure, Task},
};

/// The MPMC task queue plus K worker threads (spec §4.G, §5). Each worker
/// loops: dequeue one task with a small timeout, dispatch by kind, run
/// `onComplete`/`onFailure`. During shutdown, workers switch to a draining
/// mode that refuses new `Execute`/`Setup`/`Start` work but still drains
/// `Stop`/`Terminate` tasks.
pub(crate) struct WorkerPool {
    sender: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    terminating: Arc<AtomicBool>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        worker_threads: usize,
        buffer_manager: Arc<BufferManager>,
        engine: Weak<QueryEngine>,
        registry: Arc<QueryRegistry>,
        listener: Arc<dyn StatusListener>,
        stats: Arc<StatisticsListener>,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let terminating = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_threads.max(1))
            .map(|idx| {
                let receiver = receiver.clone();
                let buffer_manager = buffer_manager.clone();
                let engine = engine.clone();
                let registry = registry.clone();
                let listener = listener.clone();
                let stats = stats.clone();
                let terminating = terminating.clone();
                thread::Builder::new()
                    .name(format!("nebula-worker-{idx}"))
                    .spawn(move || {
                        worker_loop(
                            WorkerThreadId(idx),
                            receiver,
                            buffer_manager,
                            engine,
                            registry,
                            listener,
                            stats,
                            terminating,
                        )
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { sender, workers, terminating }
    }

    pub(crate) fn sender(&self) -> Sender<Task> {
        self.sender.clone()
    }

    pub(crate) fn shutdown(self) {
        self.terminating.store(true, Ordering::Release);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    worker_id: WorkerThreadId,
    receiver: Receiver<Task>,
    buffer_manager: Arc<BufferManager>,
    engine: Weak<QueryEngine>,
    registry: Arc<QueryRegistry>,
    listener: Arc<dyn StatusListener>,
    stats: Arc<StatisticsListener>,
    terminating: Arc<AtomicBool>,
) {
    loop {
        match receiver.recv_timeout(Duration::from_millis(10)) {
            Ok(task) => {
                let is_new_work = matches!(task, Task::ExecuteTask { .. } | Task::SetupPipeline { .. } | Task::StartQuery { .. });
                if terminating.load(Ordering::Acquire) && is_new_work {
                    continue;
                }
                let Some(engine) = engine.upgrade() else { return };
                dispatch(worker_id, task, &buffer_manager, &engine, &registry, &listener, &stats);
            }
            Err(RecvTimeoutError::Timeout) => {
                if terminating.load(Ordering::Acquire) && receiver.is_empty() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    worker_id: WorkerThreadId,
    task: Task,
    buffer_manager: &Arc<BufferManager>,
    engine: &Arc<QueryEngine>,
    registry: &Arc<QueryRegistry>,
    listener: &Arc<dyn StatusListener>,
    stats: &Arc<StatisticsListener>,
) {
    let emitter: Arc<dyn WorkEmitter> = engine.clone();
    let kind = task.kind();

    let terminated = registry.lifecycle(task.query_id()).is_some_and(|lifecycle| lifecycle.is_terminated());

    match task {
        Task::ExecuteTask { on_complete, .. } if terminated => on_complete(),
        Task::SetupPipeline { on_complete, .. } if terminated => on_complete(),

        Task::ExecuteTask { query_id, node, buffer, on_complete, on_failure } => match node.upgrade() {
            None => on_complete(),
            Some(node) => {
                let mut ctx = ExecutionContext::new(
                    worker_id,
                    query_id,
                    buffer_manager.clone(),
                    node.operator_handlers(),
                    node.successors(),
                    emitter.clone(),
                    EmitPolicy::Normal,
                    stats.clone(),
                );
                match node.stage().execute(buffer, &mut ctx) {
                    Ok(()) => {
                        stats.record_task(kind, worker_id, true);
                        on_complete();
                    }
                    Err(err) => fail_query(registry, stats, worker_id, kind, RuntimeError::stage(query_id, err), on_failure),
                }
            }
        },

        Task::SetupPipeline { query_id, node, on_complete, on_failure } => match node.upgrade() {
            None => on_complete(),
            Some(node) => {
                let mut ctx = ExecutionContext::new(
                    worker_id,
                    query_id,
                    buffer_manager.clone(),
                    node.operator_handlers(),
                    node.successors(),
                    emitter.clone(),
                    EmitPolicy::Forbidden,
                    stats.clone(),
                );
                match node.stage().setup(&mut ctx) {
                    Ok(()) => {
                        stats.record_task(kind, worker_id, true);
                        on_complete();
                    }
                    Err(err) => fail_query(registry, stats, worker_id, kind, RuntimeError::stage(query_id, err), on_failure),
                }
            }
        },

        Task::StopPipeline { query_id, node, on_complete, on_failure } => {
            let mut ctx = ExecutionContext::new(
                worker_id,
                query_id,
                buffer_manager.clone(),
                node.operator_handlers,
                node.successors,
                emitter.clone(),
                EmitPolicy::KeepAliveOnEmit,
                stats.clone(),
            );
            match node.stage.stop(&mut ctx) {
                Ok(()) => {
                    stats.record_task(kind, worker_id, true);
                    on_complete();
                }
                Err(err) => fail_query(registry, stats, worker_id, kind, RuntimeError::stage(query_id, err), on_failure),
            }
        }

        Task::StopSource { query_id, origin, source: _, on_complete } => {
            listener.log_source_termination(query_id, origin, SourceTermination::Graceful);
            stats.record_task(kind, worker_id, true);
            on_complete();
        }

        Task::FailSource { query_id, origin, source: _, error, on_complete } => {
            listener.log_source_termination(query_id, origin, SourceTermination::Failure);
            let runtime_err = RuntimeError::source_failure(query_id, origin, error);
            if let Some(lifecycle) = registry.lifecycle(query_id) {
                lifecycle.on_failure(&runtime_err);
            }
            stats.record_task(kind, worker_id, false);
            on_complete();
        }

        Task::StartQuery { query_id, plan } => {
            let registry_for_destruction = registry.clone();
            let instantiated = RunningQueryPlan::instantiate(query_id, plan, emitter.clone(), move || {
                if let Some(lifecycle) = registry_for_destruction.lifecycle(query_id) {
                    lifecycle.on_destruction();
                }
                registry_for_destruction.remove(query_id);
            });

            match instantiated {
                Ok(running_plan) => {
                    let nodes = running_plan.nodes().to_vec();
                    let lifecycle = QueryLifecycle::new(query_id, running_plan, listener.clone());
                    let stop_requested = registry.activate(query_id, lifecycle.clone(), nodes.len());
                    stats.record_task(kind, worker_id, true);

                    if stop_requested {
                        lifecycle.stop();
                        return;
                    }

                    if nodes.is_empty() {
                        lifecycle.on_running(emitter.clone());
                        return;
                    }

                    for node in &nodes {
                        let weak = Arc::downgrade(node);
                        let registry = registry.clone();
                        let lifecycle = lifecycle.clone();
                        let emitter_for_complete = emitter.clone();
                        let on_complete: OnComplete = Box::new(move || {
                            if registry.complete_setup(query_id) {
                                lifecycle.on_running(emitter_for_complete);
                            }
                        });
                        let on_failure: OnFailure = Box::new(|_err| {});
                        emitter.emit_setup(query_id, weak, on_complete, on_failure);
                    }
                }
                Err(err) => {
                    stats.record_task(kind, worker_id, false);
                    error!(query_id = %query_id, %err, "failed to instantiate query plan");
                    listener.log_query_failure(query_id, &err);
                    registry.remove(query_id);
                }
            }
        }

        Task::TerminateQuery { query_id } => {
            if let Some(lifecycle) = registry.request_stop(query_id) {
                lifecycle.stop();
            }
            stats.record_task(kind, worker_id, true);
        }
    }
}

fn fail_query(
    registry: &Arc<QueryRegistry>,
    stats: &Arc<StatisticsListener>,
    worker_id: WorkerThreadId,
    kind: &'static str,
    err: RuntimeError,
    on_failure: OnFailure,
) {
    stats.record_task(kind, worker_id, false);
    if let Some(lifecycle) = registry.lifecycle(err.query_id) {
        lifecycle.on_failure(&err);
    }
    on_failure(Box::new(err));
}
