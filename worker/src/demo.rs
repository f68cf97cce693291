use std::path::Path;
use std::sync::Arc;

use nebula_engine::{InstantiatedQueryPlan, PipelineSpec, SourceSpec};
use nebula_formatters::{FieldType, Policy, RowSchema, SyncInputFormatter, SyncInputFormatterStage};
use nebula_unsafe_collection::{BufferManager, OriginId};

use crate::sink::WindowSinkStage;
use crate::source::FileLineSource;

/// Builds the demo query: one file source feeding a synchronous input
/// formatter (schema `id:i64, ts:i64`, `\n`/`,` delimited) feeding a
/// tumbling-sum window sink (scenario: "single-origin tumbling SUM").
/// `--query <path>` in the CLI names the input file; everything else
/// about the plan's shape is fixed, since spec.md §6 leaves the wire
/// format of a "query plan file" undefined -- this is the worker's own
/// peripheral choice of what to run.
pub fn build_plan(buffer_manager: Arc<BufferManager>, path: &Path, window_size_ms: u64) -> InstantiatedQueryPlan {
    let origin = OriginId::new(1);

    let schema = RowSchema::new(vec![FieldType::Int64, FieldType::Int64]);
    let formatter = SyncInputFormatter::new(origin, "\n", ",", schema);
    let formatter_stage = Arc::new(SyncInputFormatterStage::new(formatter, Policy::Skip));

    let sink_stage = Arc::new(WindowSinkStage::new(origin, window_size_ms));

    let pipelines = vec![
        PipelineSpec {
            stage: formatter_stage,
            successors: vec![1],
            operator_handlers: Vec::new(),
        },
        PipelineSpec {
            stage: sink_stage,
            successors: Vec::new(),
            operator_handlers: Vec::new(),
        },
    ];

    let source = Box::new(FileLineSource::new(path.to_path_buf(), buffer_manager));
    let sources = vec![SourceSpec {
        origin,
        source,
        successors: vec![0],
    }];

    InstantiatedQueryPlan { pipelines, sources }
}
