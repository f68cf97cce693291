use nebula_service::{PipelineExecutionContext, PipelineStage, StageError};
use nebula_unsafe_collection::ChunkNumber;
use parking_lot::Mutex;

use crate::error::{FormatError, Policy};
use crate::formatter::SyncInputFormatter;

/// Wraps a [`SyncInputFormatter`] as the pipeline stage that sits between a
/// source and the first compiled operator chain (spec component M): raw,
/// still-delimited buffers in, schema'd `TupleBuffer`s out. Interior
/// mutability because `PipelineStage::execute` takes `&self` -- the engine
/// serializes calls per running query plan node, so contention here is the
/// same single-writer-at-a-time discipline every other stateful operator
/// handler relies on.
pub struct SyncInputFormatterStage {
    formatter: Mutex<SyncInputFormatter>,
    policy: Policy,
}

impl SyncInputFormatterStage {
    pub fn new(formatter: SyncInputFormatter, policy: Policy) -> Self {
        Self {
            formatter: Mutex::new(formatter),
            policy,
        }
    }

    fn handle_format_error(&self, err: FormatError) -> Result<(), StageError> {
        match self.policy {
            Policy::Skip => {
                tracing::warn!(error = %err, "dropping tuple that failed to format");
                Ok(())
            }
            Policy::FailQuery => Err(StageError::new(err)),
        }
    }

    /// Fills and emits as many output buffers as `tuples` needs, assigning
    /// each an ascending `ChunkNumber` and marking the last one terminal
    /// (spec component M, step 4).
    fn emit_tuples(&self, tuples: Vec<Vec<String>>, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        if tuples.is_empty() {
            return Ok(());
        }

        let formatter = self.formatter.lock();
        let origin = formatter.origin();
        let sequence = formatter.last_sequence();
        let row_size = formatter.schema().row_size().max(1);

        let mut chunk = ChunkNumber::INITIAL;
        let mut iter = tuples.into_iter().peekable();

        while iter.peek().is_some() {
            let mut out = ctx.allocate_tuple_buffer().map_err(StageError::new)?;
            let capacity = (out.buffer_size() / row_size).max(1);

            let mut written = 0usize;
            while written < capacity {
                let Some(fields) = iter.next() else { break };
                if let Err(err) = formatter.schema().write_row(&fields, out.as_bytes_mut(), written) {
                    drop(formatter);
                    return self.handle_format_error(err);
                }
                written += 1;
            }

            out.set_number_of_tuples(written);
            out.set_origin_id(origin);
            out.set_sequence_number(sequence);
            out.set_chunk_number(chunk);
            out.set_last_chunk(iter.peek().is_none());
            chunk = chunk.next();
            ctx.emit_buffer(out);
        }

        Ok(())
    }
}

impl PipelineStage for SyncInputFormatterStage {
    fn execute(&self, buf: nebula_unsafe_collection::TupleBuffer, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        let tuples = {
            let mut formatter = self.formatter.lock();
            match formatter.process(&buf) {
                Ok(tuples) => tuples,
                Err(err) => return self.handle_format_error(err),
            }
        };
        self.emit_tuples(tuples, ctx)
    }

    fn stop(&self, ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        let flushed = {
            let mut formatter = self.formatter.lock();
            match formatter.flush_on_stop() {
                Ok(flushed) => flushed,
                Err(err) => return self.handle_format_error(err),
            }
        };
        match flushed {
            Some(fields) => self.emit_tuples(vec![fields], ctx),
            None => Ok(()),
        }
    }
}
