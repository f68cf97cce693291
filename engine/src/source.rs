use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use nebula_unsafe_collection::{OriginId, ShutdownError, TupleBuffer};

use crate::{emitter::WorkEmitter, ids::QueryId, node::{GraphTracker, RunningQueryPlanNode}};

/// External contract a source implementation satisfies (spec component E;
/// concrete readers -- CSV, MQTT, generators -- are out of scope for the
/// core and live outside this crate). `run` drives production until
/// `should_stop` returns true or the source is naturally exhausted, calling
/// `emit` with ascending `(SequenceNumber, ChunkNumber)` per its `OriginId`
/// and marking the final chunk of each sequence number terminal.
pub trait Source: Send {
    fn run(
        &mut self,
        origin: OriginId,
        emit: &mut dyn FnMut(TupleBuffer) -> Result<(), ShutdownError>,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Initial,
    Running,
    Stopped,
    Failed,
}

struct SourceInner {
    state: Mutex<SourceState>,
    stop_requested: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// The live representation of one source (spec component E): an `OriginId`,
/// strong references to its immediate successor nodes, and a state machine
/// `Initial -> Running -> Stopped | Failed`. Production runs on a thread
/// dedicated to this source so the worker pool never blocks on source I/O
/// (spec §7 Non-goals, "coroutine/async sources").
pub struct RunningSource {
    query_id: QueryId,
    origin: OriginId,
    successors: Vec<Arc<RunningQueryPlanNode>>,
    inner: Arc<SourceInner>,
    tracker: Arc<GraphTracker>,
}

impl RunningSource {
    pub(crate) fn new(
        query_id: QueryId,
        origin: OriginId,
        successors: Vec<Arc<RunningQueryPlanNode>>,
        tracker: Arc<GraphTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            query_id,
            origin,
            successors,
            inner: Arc::new(SourceInner {
                state: Mutex::new(SourceState::Initial),
                stop_requested: AtomicBool::new(false),
                join: Mutex::new(None),
            }),
            tracker,
        })
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn origin(&self) -> OriginId {
        self.origin
    }

    pub fn successors(&self) -> &[Arc<RunningQueryPlanNode>] {
        &self.successors
    }

    /// Begins production on a dedicated thread. The source calls back into
    /// `emitter` exactly once to report its own termination, either via
    /// `initializeSourceStop` (graceful exhaustion/stop) or
    /// `initializeSourceFailure` (unrecoverable read error).
    pub(crate) fn start(self: &Arc<Self>, source: Box<dyn Source>, emitter: Arc<dyn WorkEmitter>) {
        {
            let mut state = self.inner.state.lock().unwrap();
            assert_eq!(*state, SourceState::Initial, "source started twice");
            *state = SourceState::Running;
        }

        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("nebula-source-{}", self.origin))
            .spawn(move || this.drive(source, emitter))
            .expect("failed to spawn source thread");
        *self.inner.join.lock().unwrap() = Some(handle);
    }

    fn drive(self: Arc<Self>, mut source: Box<dyn Source>, emitter: Arc<dyn WorkEmitter>) {
        let stop_requested = &self.inner.stop_requested;
        let should_stop = || stop_requested.load(Ordering::Acquire);
        let query_id = self.query_id;
        let successors = self.successors.clone();
        let mut emit = |buffer: TupleBuffer| -> Result<(), ShutdownError> {
            crate::emitter::fan_out_to_successors(emitter.as_ref(), query_id, &successors, buffer, false);
            Ok(())
        };

        let result = source.run(self.origin, &mut emit, &should_stop);
        let weak: Weak<RunningSource> = Arc::downgrade(&self);
        let mut state = self.inner.state.lock().unwrap();
        match result {
            Ok(()) => {
                *state = SourceState::Stopped;
                drop(state);
                emitter.initialize_source_stop(query_id, self.origin, weak);
            }
            Err(err) => {
                *state = SourceState::Failed;
                drop(state);
                emitter.initialize_source_failure(query_id, self.origin, weak, err);
            }
        }
    }

    /// Idempotent, graceful: flips the stop flag and joins the source
    /// thread (spec component E). Safe to call from any thread, including
    /// more than once.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.inner.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(*self.inner.state.lock().unwrap(), SourceState::Stopped | SourceState::Failed)
    }
}

impl Drop for RunningSource {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
