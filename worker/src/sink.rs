use std::sync::Arc;

use nebula_service::{PipelineExecutionContext, PipelineStage, StageError};
use nebula_unsafe_collection::{ChunkNumber, OriginId, SequenceNumber, TupleBuffer, WatermarkTimestamp};
use nebula_windowing::WindowOperator;
use parking_lot::Mutex;

use crate::aggregation::SumAggregation;
use crate::row::Row;

/// Terminal stage of the demo query: ingests every `Row` in a formatted
/// buffer into the window operator, advances the watermark to the buffer's
/// largest observed event time, and logs any window the advance closes.
/// Stands in for the "sink" spec.md treats as outside the core's scope --
/// a real deployment would instead hand closed windows to a downstream
/// connector.
pub struct WindowSinkStage {
    origin: OriginId,
    operator: WindowOperator<i64, SumAggregation>,
    /// The last `(seqNo, chunkNo)` this stage observed, so `stop` can hand
    /// the watermark processor a genuinely new sequence number rather than
    /// one it would drop as already-seen (spec component J requires
    /// strictly ascending sequence numbers per origin).
    last_seen: Mutex<(SequenceNumber, ChunkNumber)>,
}

impl WindowSinkStage {
    pub fn new(origin: OriginId, window_size_ms: u64) -> Self {
        Self {
            origin,
            operator: WindowOperator::new([origin], nebula_windowing::WindowAssigner::tumbling(window_size_ms), Arc::new(SumAggregation), false),
            last_seen: Mutex::new((SequenceNumber::default(), ChunkNumber::default())),
        }
    }
}

impl PipelineStage for WindowSinkStage {
    fn execute(&self, buf: TupleBuffer, _ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        let rows = buf.get_buffer::<Row>();
        let count = buf.get_number_of_tuples();
        let mut max_ts: i64 = 0;
        for row in &rows[..count.min(rows.len())] {
            // Un-grouped SUM: every row folds into the same key so the
            // window holds one running total rather than one per id.
            self.operator.ingest(0, row.ts.max(0) as u64, &row.id);
            max_ts = max_ts.max(row.ts);
        }

        *self.last_seen.lock() = (buf.sequence_number(), buf.chunk_number());

        self.operator.on_buffer_seen(
            WatermarkTimestamp::new(max_ts.max(0) as u64),
            buf.sequence_number(),
            buf.chunk_number(),
            buf.is_last_chunk(),
            buf.origin_id(),
            |row| {
                tracing::info!(start_ts = row.start_ts, end_ts = row.end_ts, key = row.key, sum = row.value, "window closed");
            },
        );
        Ok(())
    }

    fn stop(&self, _ctx: &mut dyn PipelineExecutionContext) -> Result<(), StageError> {
        // Force-close any window still open when the source has exhausted
        // itself, by advancing the watermark past every window the
        // configured size could ever produce, under a sequence number one
        // past the last one actually observed.
        let (last_seq, _) = *self.last_seen.lock();
        self.operator.on_buffer_seen(WatermarkTimestamp::new(u64::MAX), last_seq.next(), ChunkNumber::INITIAL, true, self.origin, |row| {
            tracing::info!(start_ts = row.start_ts, end_ts = row.end_ts, key = row.key, sum = row.value, "window closed (final flush)");
        });
        Ok(())
    }
}
