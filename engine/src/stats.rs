use std::sync::atomic::{AtomicU64, Ordering};

use nebula_service::WorkerThreadId;
use tracing::debug;

/// Point-in-time read of the engine's atomic counters (spec §4.O ambient
/// addition). Cheap enough to poll; not itself a metrics exporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub buffers_emitted: u64,
}

/// Engine-wide bookkeeping, shared across worker threads. Emits one
/// `tracing` debug event per task dispatch in addition to bumping its
/// counters, so a deployment can get ambient visibility without wiring a
/// metrics backend (spec §4.O).
#[derive(Default)]
pub struct StatisticsListener {
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    buffers_emitted: AtomicU64,
}

impl StatisticsListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_task(&self, kind: &'static str, worker: WorkerThreadId, succeeded: bool) {
        debug!(task_kind = kind, worker_thread = worker.0, succeeded, "task dispatched");
        if succeeded {
            self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_buffer_emitted(&self) {
        self.buffers_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            buffers_emitted: self.buffers_emitted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = StatisticsListener::new();
        stats.record_task("execute", WorkerThreadId(0), true);
        stats.record_task("execute", WorkerThreadId(1), false);
        stats.record_buffer_emitted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_executed, 1);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.buffers_emitted, 1);
    }
}
