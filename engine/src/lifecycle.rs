use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    emitter::WorkEmitter,
    ids::QueryId,
    listener::{QueryStatus, StatusListener},
    plan::{RunningQueryPlan, StoppingQueryPlan},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TerminationReason {
    Stopped,
    Failed,
}

enum State {
    Starting(RunningQueryPlan),
    Running(RunningQueryPlan),
    Stopping(StoppingQueryPlan),
    Terminated(TerminationReason),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Starting(_) => "starting",
            State::Running(_) => "running",
            State::Stopping(_) => "stopping",
            State::Terminated(_) => "terminated",
        }
    }
}

/// Per-query state holder (spec §4.H). Every transition is an atomic
/// compare-and-swap through this `Mutex`; illegal transitions (e.g. two
/// failure paths racing) are silently dropped rather than panicking, since
/// they correspond to races the state machine is defined to absorb.
pub struct QueryLifecycle {
    query_id: QueryId,
    state: Mutex<State>,
    listener: Arc<dyn StatusListener>,
}

impl QueryLifecycle {
    pub fn new(query_id: QueryId, plan: RunningQueryPlan, listener: Arc<dyn StatusListener>) -> Arc<Self> {
        listener.log_query_status_change(query_id, QueryStatus::Starting);
        Arc::new(Self {
            query_id,
            state: Mutex::new(State::Starting(plan)),
            listener,
        })
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn is_terminated(&self) -> bool {
        matches!(*self.state.lock(), State::Terminated(_))
    }

    /// `Starting -> Running`. Fires once every node's setup has completed;
    /// starts every source now that it's safe for data to begin flowing.
    /// A no-op if the query already moved past `Starting`.
    pub fn on_running(&self, emitter: Arc<dyn WorkEmitter>) {
        let mut state = self.state.lock();
        if let State::Starting(_) = &*state {
            let State::Starting(plan) = std::mem::replace(&mut *state, State::Terminated(TerminationReason::Stopped)) else {
                unreachable!()
            };
            plan.start_sources(emitter);
            *state = State::Running(plan);
            drop(state);
            self.listener.log_query_status_change(self.query_id, QueryStatus::Running);
        }
    }

    /// `Starting|Running -> Stopping`. Stops every source and keeps
    /// draining nodes alive through a [`StoppingQueryPlan`]. A no-op
    /// (returns `false`) once the query is already stopping or terminated.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        match &*state {
            State::Starting(_) | State::Running(_) => {
                let previous = std::mem::replace(&mut *state, State::Terminated(TerminationReason::Stopped));
                let plan = match previous {
                    State::Starting(plan) | State::Running(plan) => plan,
                    _ => unreachable!(),
                };
                *state = State::Stopping(plan.begin_stop());
                true
            }
            _ => false,
        }
    }

    /// `Starting|Running|Stopping -> Terminated{Failed}`. A no-op once the
    /// query is already terminated -- the first failure wins.
    pub fn on_failure(&self, error: &(dyn std::error::Error + Send + Sync)) {
        let mut state = self.state.lock();
        if matches!(&*state, State::Terminated(_)) {
            return;
        }
        tracing::debug!(query_id = %self.query_id, from = state.name(), "query transitioning to terminated/failed");
        *state = State::Terminated(TerminationReason::Failed);
        drop(state);
        self.listener.log_query_failure(self.query_id, error);
    }

    /// `Starting|Running|Stopping -> Terminated{Stopped}`. Fires when the
    /// entire graph -- nodes and sources -- has dropped. A no-op once the
    /// query already terminated (e.g. a failure won the race).
    pub fn on_destruction(&self) {
        let mut state = self.state.lock();
        if matches!(&*state, State::Terminated(_)) {
            return;
        }
        *state = State::Terminated(TerminationReason::Stopped);
        drop(state);
        self.listener.log_query_status_change(self.query_id, QueryStatus::Stopped);
    }
}
