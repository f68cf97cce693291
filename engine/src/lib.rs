mod config;
mod context;
mod emitter;
mod engine;
mod error;
mod ids;
mod lifecycle;
mod listener;
mod node;
mod plan;
mod source;
mod stats;
mod task;
mod worker_pool;

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use emitter::WorkEmitter;
pub use engine::QueryEngine;
pub use error::{ConfigError, RuntimeError};
pub use ids::{QueryId, QueryIdGenerator};
pub use lifecycle::{QueryLifecycle, TerminationReason};
pub use listener::{QueryStatus, RecordedEvent, RecordingStatusListener, SourceTermination, StatusListener, TracingStatusListener};
pub use node::{DrainingNode, RunningQueryPlanNode};
pub use plan::{InstantiatedQueryPlan, PipelineSpec, PlanError, RunningQueryPlan, SourceSpec, StoppingQueryPlan};
pub use source::{RunningSource, Source};
pub use stats::{StatisticsListener, StatisticsSnapshot};
pub use task::{OnComplete, OnFailure, Task};
