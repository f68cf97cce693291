use std::fmt;
use std::sync::{Arc, Mutex};

use nebula_service::{BoxedStage, OperatorHandler};
use nebula_unsafe_collection::OriginId;

use crate::{
    emitter::WorkEmitter,
    ids::QueryId,
    node::{GraphTracker, RunningQueryPlanNode},
    source::{RunningSource, Source},
};

/// One pipeline in an instantiated plan: an opaque stage plus the indices
/// of its successor pipelines within the same plan (spec §6 "Engine
/// façade").
pub struct PipelineSpec {
    pub stage: BoxedStage,
    pub successors: Vec<usize>,
    pub operator_handlers: Vec<Arc<dyn OperatorHandler>>,
}

/// One source in an instantiated plan: the opaque source implementation
/// plus the indices of the pipelines it feeds directly.
pub struct SourceSpec {
    pub origin: OriginId,
    pub source: Box<dyn Source>,
    pub successors: Vec<usize>,
}

/// A DAG of pipeline stages plus sources, ready to start: `{sources[],
/// pipelines[]{stage, successors[]}}` (spec §6).
pub struct InstantiatedQueryPlan {
    pub pipelines: Vec<PipelineSpec>,
    pub sources: Vec<SourceSpec>,
}

#[derive(Debug)]
pub struct PlanError(pub String);

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid query plan: {}", self.0)
    }
}

impl std::error::Error for PlanError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Returns pipeline indices in an order where every successor precedes its
/// predecessors, or an error if the DAG contains a cycle. A cycle between
/// nodes is a planner bug and must be rejected at start time (spec §7
/// "Cyclic references").
fn topological_order(pipelines: &[PipelineSpec]) -> Result<Vec<usize>, PlanError> {
    fn visit(i: usize, pipelines: &[PipelineSpec], mark: &mut [Mark], order: &mut Vec<usize>) -> Result<(), PlanError> {
        match mark[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(PlanError(format!("cycle detected through pipeline index {i}"))),
            Mark::Unvisited => {}
        }
        mark[i] = Mark::InProgress;
        for &successor in &pipelines[i].successors {
            visit(successor, pipelines, mark, order)?;
        }
        mark[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    let mut mark = vec![Mark::Unvisited; pipelines.len()];
    let mut order = Vec::with_capacity(pipelines.len());
    for i in 0..pipelines.len() {
        visit(i, pipelines, &mut mark, &mut order)?;
    }
    Ok(order)
}

/// Ownership handle over a started query: owns every source and,
/// transitively through source and node successor links, every pipeline
/// node (spec §4 "RunningQueryPlan / StoppingQueryPlan").
pub struct RunningQueryPlan {
    query_id: QueryId,
    sources: Vec<Arc<RunningSource>>,
    nodes: Vec<Arc<RunningQueryPlanNode>>,
    /// Sources are built eagerly but not started until every node's
    /// `setup` has completed (spec §4.H: `onRunning` fires only once setup
    /// is done, and `Setup` may not race with live data). `None` once
    /// [`Self::start_sources`] has consumed it.
    pending_sources: Mutex<Option<Vec<(Arc<RunningSource>, Box<dyn Source>)>>>,
}

impl RunningQueryPlan {
    /// Builds every `RunningQueryPlanNode` bottom-up (successors before
    /// predecessors) and every `RunningSource`, wiring a [`GraphTracker`]
    /// across the whole graph so `on_destruction` fires exactly once when
    /// the last node and source have dropped. Sources are built but not
    /// yet producing; call [`Self::start_sources`] once setup completes.
    pub fn instantiate(
        query_id: QueryId,
        plan: InstantiatedQueryPlan,
        emitter: Arc<dyn WorkEmitter>,
        on_destruction: impl FnOnce() + Send + 'static,
    ) -> Result<Self, PlanError> {
        let InstantiatedQueryPlan { pipelines, sources } = plan;
        let order = topological_order(&pipelines)?;
        let tracker = GraphTracker::new(pipelines.len() + sources.len(), on_destruction);

        let mut built: Vec<Option<Arc<RunningQueryPlanNode>>> = (0..pipelines.len()).map(|_| None).collect();
        for idx in order {
            let spec = &pipelines[idx];
            let successor_nodes: Vec<Arc<RunningQueryPlanNode>> = spec
                .successors
                .iter()
                .map(|&s| built[s].clone().expect("topological order builds successors first"))
                .collect();
            let node = RunningQueryPlanNode::new(
                query_id,
                spec.stage.clone(),
                successor_nodes,
                spec.operator_handlers.clone(),
                emitter.clone(),
                tracker.clone(),
            );
            built[idx] = Some(node);
        }
        let nodes: Vec<Arc<RunningQueryPlanNode>> = built.into_iter().map(|n| n.expect("every pipeline index is visited")).collect();

        let mut pending_sources = Vec::with_capacity(sources.len());
        let mut running_sources = Vec::with_capacity(sources.len());
        for source_spec in sources {
            let successor_nodes: Vec<Arc<RunningQueryPlanNode>> = source_spec
                .successors
                .iter()
                .map(|&s| nodes[s].clone())
                .collect();
            let running = RunningSource::new(query_id, source_spec.origin, successor_nodes, tracker.clone());
            running_sources.push(running.clone());
            pending_sources.push((running, source_spec.source));
        }

        Ok(Self {
            query_id,
            sources: running_sources,
            nodes,
            pending_sources: Mutex::new(Some(pending_sources)),
        })
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn sources(&self) -> &[Arc<RunningSource>] {
        &self.sources
    }

    pub fn nodes(&self) -> &[Arc<RunningQueryPlanNode>] {
        &self.nodes
    }

    /// Starts production on every source. A no-op if already called (e.g.
    /// a stop raced in before setup finished) -- in that case the sources
    /// simply never start and the plan drains straight through.
    pub fn start_sources(&self, emitter: Arc<dyn WorkEmitter>) {
        if let Some(pending) = self.pending_sources.lock().unwrap().take() {
            for (running, source) in pending {
                running.start(source, emitter.clone());
            }
        }
    }

    /// Stops every source -- idempotent and graceful, blocking until each
    /// source's thread has actually exited -- then drops this plan's own
    /// top-level ownership of every node and source. What's left is exactly
    /// the DAG's successor chain: each node is kept alive only by whichever
    /// predecessor (or source) still references it, so the last node drops,
    /// and fires its own `StopPipeline` task, only once everything upstream
    /// of it has finished draining.
    pub fn begin_stop(self) -> StoppingQueryPlan {
        for source in &self.sources {
            source.stop();
        }
        StoppingQueryPlan { query_id: self.query_id }
    }
}

/// Marks a query as past the point of no return -- its sources are stopped
/// and the engine no longer holds any node alive on the plan's behalf.
/// What drives nodes to actually drop (and the graph tracker to eventually
/// fire `on_destruction`) is the successor chain of `Arc`s built at
/// instantiation time, not this struct (spec §4 "RunningQueryPlan /
/// StoppingQueryPlan").
pub struct StoppingQueryPlan {
    query_id: QueryId,
}

impl StoppingQueryPlan {
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(successors: Vec<usize>) -> PipelineSpec {
        let stage: BoxedStage = Arc::new(nebula_service::fn_stage(|_buf, _ctx| Ok(())));
        PipelineSpec {
            stage,
            successors,
            operator_handlers: Vec::new(),
        }
    }

    #[test]
    fn detects_direct_cycle() {
        let pipelines = vec![stage(vec![1]), stage(vec![0])];
        let err = topological_order(&pipelines).unwrap_err();
        assert!(err.0.contains("cycle"));
    }

    #[test]
    fn accepts_diamond_dag() {
        // 0 -> {1, 2} -> 3
        let pipelines = vec![stage(vec![1, 2]), stage(vec![3]), stage(vec![3]), stage(vec![])];
        let order = topological_order(&pipelines).unwrap();
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        assert!(pos(3) < pos(1));
        assert!(pos(3) < pos(2));
        assert!(pos(1) < pos(0));
        assert!(pos(2) < pos(0));
    }
}
