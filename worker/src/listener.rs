use std::sync::mpsc::Sender;
use std::sync::Mutex;

use nebula_engine::{QueryId, QueryStatus, SourceTermination, StatusListener, TracingStatusListener};
use nebula_unsafe_collection::OriginId;

/// What the worker's `main` is actually waiting on: a query either stops
/// gracefully or fails. Since this binary runs exactly one query at a time
/// (spec §6's CLI surface is a single `--query` run), there's no need to
/// track a specific `QueryId` -- the first terminal event of either kind
/// ends the process.
pub enum Outcome {
    Stopped,
    Failed(String),
}

/// Forwards every status event to [`TracingStatusListener`] the way a real
/// deployment would, and additionally signals `main` exactly once the
/// query reaches a terminal state.
pub struct CompletionListener {
    inner: TracingStatusListener,
    sender: Mutex<Option<Sender<Outcome>>>,
}

impl CompletionListener {
    pub fn new(sender: Sender<Outcome>) -> Self {
        Self {
            inner: TracingStatusListener,
            sender: Mutex::new(Some(sender)),
        }
    }

    fn complete(&self, outcome: Outcome) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(outcome);
        }
    }
}

impl StatusListener for CompletionListener {
    fn log_query_status_change(&self, query_id: QueryId, status: QueryStatus) {
        self.inner.log_query_status_change(query_id, status);
        if status == QueryStatus::Stopped {
            self.complete(Outcome::Stopped);
        }
    }

    fn log_query_failure(&self, query_id: QueryId, error: &(dyn std::error::Error + Send + Sync)) {
        self.inner.log_query_failure(query_id, error);
        self.complete(Outcome::Failed(error.to_string()));
    }

    fn log_source_termination(&self, query_id: QueryId, origin: OriginId, termination: SourceTermination) {
        self.inner.log_source_termination(query_id, origin, termination);
    }
}
