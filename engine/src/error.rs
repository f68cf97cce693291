use std::fmt;

use nebula_unsafe_collection::OriginId;
use nebula_service::StageError;

use crate::ids::QueryId;

/// Failure raised from inside a pipeline stage's `setup`/`execute`/`stop`,
/// or from a source. Surfaces via [`crate::listener::StatusListener::log_query_failure`]
/// and drives the query's lifecycle into `Terminated{Failed}` (spec §7).
#[derive(Debug)]
pub struct RuntimeError {
    pub query_id: QueryId,
    pub origin: Option<OriginId>,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl RuntimeError {
    pub fn stage(query_id: QueryId, err: StageError) -> Self {
        Self {
            query_id,
            origin: None,
            source: Box::new(err),
        }
    }

    pub fn source_failure(query_id: QueryId, origin: OriginId, err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            query_id,
            origin: Some(origin),
            source: err,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(origin) => write!(f, "query {} failed (origin {}): {}", self.query_id, origin, self.source),
            None => write!(f, "query {} failed: {}", self.query_id, self.source),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Peripheral configuration problems (spec §6 exit code 1). Not raised by
/// the core engine itself -- `nebula-worker` surfaces this while turning
/// CLI flags/config files into an [`crate::config::EngineConfig`].
#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}
