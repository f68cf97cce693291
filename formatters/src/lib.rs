//! Synchronous input formatting (spec component M): turns raw, still
//! delimited-text buffers arriving from a source into schema'd, fixed-row
//! `TupleBuffer`s the compiled operator chain downstream can read with
//! `get_buffer::<T>`. Runs as an ordinary [`nebula_service::PipelineStage`]
//! so it composes with the rest of a query plan the same way any other
//! stage does.

mod error;
mod field;
mod formatter;
mod stage;

pub use error::{FormatError, Policy};
pub use field::{FieldType, RowSchema};
pub use formatter::SyncInputFormatter;
pub use stage::SyncInputFormatterStage;
