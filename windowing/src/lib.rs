//! Multi-origin watermark tracking and watermark-triggered windowed
//! aggregation (spec components J/K/L). The windowing machinery itself is
//! engine-agnostic: it holds no `TupleBuffer`/`PipelineStage` dependency
//! beyond the routing metadata types in `nebula-unsafe-collection`, so a
//! compiled pipeline stage (opaque to the core per spec §1) wires it in by
//! holding a [`operator::WindowOperator`] as one of its operator handlers.

mod error;
mod operator;
mod slice_store;
mod trigger;
mod watermark;

pub use error::WindowError;
pub use operator::WindowOperator;
pub use slice_store::{WindowAggregation, WindowAssigner, WindowSliceStore};
pub use trigger::{CompleteAggregationTrigger, WindowRow};
pub use watermark::{MultiOriginWatermarkProcessor, WatermarkSnapshot};
