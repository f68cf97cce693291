use std::sync::Mutex;

use nebula_unsafe_collection::OriginId;
use tracing::{error, info};

use crate::ids::QueryId;

/// Status values `logQueryStatusChange` reports (spec §6 "Status listener
/// API"). `Stopping` is not a reported status -- only the terminal states a
/// caller can observe externally are.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueryStatus {
    Starting,
    Running,
    Stopped,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SourceTermination {
    Graceful,
    Failure,
}

/// The external observer the query lifecycle drives (spec §6). Every
/// method fires at most once per event per query; illegal or duplicate
/// transitions are dropped before reaching the listener (spec §4.H).
pub trait StatusListener: Send + Sync {
    fn log_query_status_change(&self, query_id: QueryId, status: QueryStatus);
    fn log_query_failure(&self, query_id: QueryId, error: &(dyn std::error::Error + Send + Sync));
    fn log_source_termination(&self, query_id: QueryId, origin: OriginId, termination: SourceTermination);
}

/// Default listener: everything goes to `tracing`. What a real deployment
/// wires up unless it needs to forward events elsewhere (metrics backend,
/// control plane RPC).
#[derive(Default)]
pub struct TracingStatusListener;

impl StatusListener for TracingStatusListener {
    fn log_query_status_change(&self, query_id: QueryId, status: QueryStatus) {
        info!(query_id = %query_id, ?status, "query status changed");
    }

    fn log_query_failure(&self, query_id: QueryId, error: &(dyn std::error::Error + Send + Sync)) {
        error!(query_id = %query_id, %error, "query failed");
    }

    fn log_source_termination(&self, query_id: QueryId, origin: OriginId, termination: SourceTermination) {
        info!(query_id = %query_id, %origin, ?termination, "source terminated");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    StatusChange(QueryId, QueryStatus),
    Failure(QueryId, String),
    SourceTermination(QueryId, OriginId, SourceTermination),
}

/// Test double that records every event in arrival order instead of
/// logging it, so scenario tests can assert on exact lifecycle sequences
/// (spec §8 scenarios 5 and 6).
#[derive(Default)]
pub struct RecordingStatusListener {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingStatusListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StatusListener for RecordingStatusListener {
    fn log_query_status_change(&self, query_id: QueryId, status: QueryStatus) {
        self.events.lock().unwrap().push(RecordedEvent::StatusChange(query_id, status));
    }

    fn log_query_failure(&self, query_id: QueryId, error: &(dyn std::error::Error + Send + Sync)) {
        self.events.lock().unwrap().push(RecordedEvent::Failure(query_id, error.to_string()));
    }

    fn log_source_termination(&self, query_id: QueryId, origin: OriginId, termination: SourceTermination) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::SourceTermination(query_id, origin, termination));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_listener_captures_events_in_order() {
        let listener = RecordingStatusListener::new();
        listener.log_query_status_change(QueryId::from(1u64), QueryStatus::Starting);
        listener.log_query_status_change(QueryId::from(1u64), QueryStatus::Running);
        let events = listener.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RecordedEvent::StatusChange(QueryId::from(1u64), QueryStatus::Starting));
        assert_eq!(events[1], RecordedEvent::StatusChange(QueryId::from(1u64), QueryStatus::Running));
    }
}
