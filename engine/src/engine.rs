use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::Sender;
use nebula_unsafe_collection::{BufferManager, OriginId, TupleBuffer};
use tracing::warn;

use crate::{
    config::EngineConfig,
    emitter::WorkEmitter,
    ids::{QueryId, QueryIdGenerator},
    lifecycle::QueryLifecycle,
    listener::{StatusListener, TracingStatusListener},
    node::{DrainingNode, RunningQueryPlanNode},
    plan::InstantiatedQueryPlan,
    source::RunningSource,
    stats::StatisticsListener,
    task::{OnComplete, OnFailure, Task},
    worker_pool::WorkerPool,
};

enum QueryEntry {
    /// `StartQuery` has been enqueued but not yet dispatched; `stop()`
    /// calls targeting this id only have a flag to set.
    Pending { stop_requested: AtomicBool },
    Active {
        lifecycle: Arc<QueryLifecycle>,
        remaining_setups: AtomicUsize,
    },
}

/// Bookkeeping the worker pool consults by `QueryId`: which query is still
/// warming up (`Pending`), which is live (`Active`) and how many node
/// setups it's still waiting on before `onRunning` can fire.
#[derive(Default)]
pub(crate) struct QueryRegistry {
    entries: Mutex<HashMap<QueryId, QueryEntry>>,
}

impl QueryRegistry {
    fn insert_pending(&self, query_id: QueryId) {
        self.entries.lock().unwrap().insert(
            query_id,
            QueryEntry::Pending {
                stop_requested: AtomicBool::new(false),
            },
        );
    }

    /// Converts a `Pending` entry to `Active`. Returns whether a stop was
    /// requested while the query was still pending.
    fn activate(&self, query_id: QueryId, lifecycle: Arc<QueryLifecycle>, setup_count: usize) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let stop_requested = matches!(
            entries.get(&query_id),
            Some(QueryEntry::Pending { stop_requested }) if stop_requested.load(Ordering::Acquire)
        );
        entries.insert(
            query_id,
            QueryEntry::Active {
                lifecycle,
                remaining_setups: AtomicUsize::new(setup_count),
            },
        );
        stop_requested
    }

    fn lifecycle(&self, query_id: QueryId) -> Option<Arc<QueryLifecycle>> {
        match self.entries.lock().unwrap().get(&query_id) {
            Some(QueryEntry::Active { lifecycle, .. }) => Some(lifecycle.clone()),
            _ => None,
        }
    }

    /// Decrements the remaining-setup counter; returns `true` exactly once,
    /// on the call that brings it to zero.
    fn complete_setup(&self, query_id: QueryId) -> bool {
        match self.entries.lock().unwrap().get(&query_id) {
            Some(QueryEntry::Active { remaining_setups, .. }) => remaining_setups.fetch_sub(1, Ordering::AcqRel) == 1,
            _ => false,
        }
    }

    /// Requests a stop. If the query is still `Pending`, only flags it;
    /// the flag is consulted by [`Self::activate`]. Returns the lifecycle
    /// to stop, if the query was already active.
    fn request_stop(&self, query_id: QueryId) -> Option<Arc<QueryLifecycle>> {
        match self.entries.lock().unwrap().get(&query_id) {
            Some(QueryEntry::Pending { stop_requested }) => {
                stop_requested.store(true, Ordering::Release);
                None
            }
            Some(QueryEntry::Active { lifecycle, .. }) => Some(lifecycle.clone()),
            None => None,
        }
    }

    fn remove(&self, query_id: QueryId) {
        self.entries.lock().unwrap().remove(&query_id);
    }
}

/// The engine facade (spec §6): `start(QueryId, InstantiatedQueryPlan)`,
/// `stop(QueryId)`. Owns the buffer pool, the worker pool, and every
/// query's lifecycle state. Instantiable with no process-wide singletons
/// (spec §9 "Global state") -- construct as many as you like, each with
/// its own `EngineConfig`.
pub struct QueryEngine {
    buffer_manager: Arc<BufferManager>,
    sender: Sender<Task>,
    pool: Mutex<Option<WorkerPool>>,
    registry: Arc<QueryRegistry>,
    id_gen: QueryIdGenerator,
    listener: Arc<dyn StatusListener>,
    stats: Arc<StatisticsListener>,
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::with_listener(config, Arc::new(TracingStatusListener))
    }

    pub fn with_listener(config: EngineConfig, listener: Arc<dyn StatusListener>) -> Arc<Self> {
        let buffer_manager = Arc::new(BufferManager::new(config.pool));
        let registry = Arc::new(QueryRegistry::default());
        let stats = Arc::new(StatisticsListener::new());

        Arc::new_cyclic(|weak: &Weak<QueryEngine>| {
            let pool = WorkerPool::new(
                config.worker_threads,
                buffer_manager.clone(),
                weak.clone(),
                registry.clone(),
                listener.clone(),
                stats.clone(),
            );
            Self {
                buffer_manager,
                sender: pool.sender(),
                pool: Mutex::new(Some(pool)),
                registry,
                id_gen: QueryIdGenerator::new(),
                listener,
                stats,
            }
        })
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn statistics(&self) -> crate::stats::StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Assigns a `QueryId` and enqueues `StartQuery`; the plan is actually
    /// instantiated by whichever worker dequeues it (spec §4.G / §6).
    /// Returns immediately.
    pub fn start(self: &Arc<Self>, plan: InstantiatedQueryPlan) -> QueryId {
        let query_id = self.id_gen.next();
        self.registry.insert_pending(query_id);
        if self
            .sender
            .send(Task::StartQuery { query_id, plan })
            .is_err()
        {
            warn!(query_id = %query_id, "engine shutting down, query never started");
        }
        query_id
    }

    /// Enqueues `TerminateQuery`. A no-op if the query is unknown or
    /// already terminated.
    pub fn stop(&self, query_id: QueryId) {
        if self.sender.send(Task::TerminateQuery { query_id }).is_err() {
            warn!(query_id = %query_id, "engine shutting down, stop request dropped");
        }
    }

    /// Switches every worker to draining mode and joins them (spec §5).
    /// Outstanding `Stop`/`Terminate` tasks still run; new `Execute`/`Setup`
    /// tasks are refused.
    pub fn shutdown(&self) {
        // Wake any worker blocked in `get_buffer_blocking` first -- `pool.shutdown()`
        // joins every worker thread, and a worker stuck on backpressure would never
        // unblock (and the join would hang forever) if this ran after it instead.
        self.buffer_manager.shutdown();
        if let Some(pool) = self.pool.lock().unwrap().take() {
            pool.shutdown();
        }
    }

    pub(crate) fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    pub(crate) fn listener(&self) -> &Arc<dyn StatusListener> {
        &self.listener
    }

    pub(crate) fn stats(&self) -> &Arc<StatisticsListener> {
        &self.stats
    }
}

impl WorkEmitter for QueryEngine {
    fn emit_work(
        &self,
        query_id: QueryId,
        node: Weak<RunningQueryPlanNode>,
        buffer: TupleBuffer,
        on_complete: OnComplete,
        on_failure: OnFailure,
    ) {
        let sent = self.sender.send(Task::ExecuteTask {
            query_id,
            node,
            buffer,
            on_complete,
            on_failure,
        });
        if sent.is_err() {
            warn!(query_id = %query_id, "engine shutting down, execute task dropped");
        }
    }

    fn emit_setup(&self, query_id: QueryId, node: Weak<RunningQueryPlanNode>, on_complete: OnComplete, on_failure: OnFailure) {
        let sent = self.sender.send(Task::SetupPipeline {
            query_id,
            node,
            on_complete,
            on_failure,
        });
        if sent.is_err() {
            warn!(query_id = %query_id, "engine shutting down, setup task dropped");
        }
    }

    fn emit_stop(&self, query_id: QueryId, node: DrainingNode, on_complete: OnComplete, on_failure: OnFailure) {
        let sent = self.sender.send(Task::StopPipeline {
            query_id,
            node,
            on_complete,
            on_failure,
        });
        if sent.is_err() {
            warn!(query_id = %query_id, "engine shutting down, stop-pipeline task dropped");
        }
    }

    fn initialize_source_stop(&self, query_id: QueryId, origin: OriginId, source: Weak<RunningSource>) {
        let on_complete: OnComplete = Box::new(|| {});
        let sent = self.sender.send(Task::StopSource {
            query_id,
            origin,
            source,
            on_complete,
        });
        if sent.is_err() {
            warn!(query_id = %query_id, %origin, "engine shutting down, source-stop notification dropped");
        }
    }

    fn initialize_source_failure(&self, query_id: QueryId, origin: OriginId, source: Weak<RunningSource>, error: Box<dyn std::error::Error + Send + Sync>) {
        let on_complete: OnComplete = Box::new(|| {});
        let sent = self.sender.send(Task::FailSource {
            query_id,
            origin,
            source,
            error,
            on_complete,
        });
        if sent.is_err() {
            warn!(query_id = %query_id, %origin, "engine shutting down, source-failure notification dropped");
        }
    }
}

