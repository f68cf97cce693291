use std::hash::Hash;
use std::sync::Arc;

use nebula_unsafe_collection::{ChunkNumber, OriginId, SequenceNumber, WatermarkTimestamp};
use parking_lot::Mutex;

use crate::slice_store::{WindowAggregation, WindowAssigner, WindowSliceStore};
use crate::trigger::{CompleteAggregationTrigger, WindowRow};
use crate::watermark::MultiOriginWatermarkProcessor;

/// Bundles the three windowing components (J/K/L) into the single piece of
/// state a compiled pipeline stage actually holds as one of its
/// `operator_handlers` (spec's `PipelineExecutionContext::operatorHandlers`,
/// opaque to the engine). A stage's generated `execute` calls
/// [`Self::ingest`] per input record and [`Self::on_buffer_seen`] once the
/// buffer's routing metadata has been folded in, emitting any rows the
/// watermark advance closes.
///
/// Blanket-implements [`nebula_service::OperatorHandler`] like any other
/// `Send + Sync + 'static` type; the engine never looks inside it.
pub struct WindowOperator<K, Agg: WindowAggregation> {
    watermark: MultiOriginWatermarkProcessor,
    store: WindowSliceStore<K, Agg>,
    trigger: CompleteAggregationTrigger<Agg>,
    last_watermark: Mutex<u64>,
}

impl<K, Agg> WindowOperator<K, Agg>
where
    K: Eq + Hash + Clone + Ord,
    Agg: WindowAggregation,
{
    pub fn new(origins: impl IntoIterator<Item = OriginId>, assigner: WindowAssigner, aggregation: Arc<Agg>, merging: bool) -> Self {
        Self {
            watermark: MultiOriginWatermarkProcessor::new(origins),
            store: WindowSliceStore::new(assigner, aggregation),
            trigger: CompleteAggregationTrigger::new(assigner, merging),
            last_watermark: Mutex::new(0),
        }
    }

    /// Folds one input record, observed at event time `t`, into `key`'s
    /// window slices.
    pub fn ingest(&self, key: K, t: u64, input: &Agg::Input) {
        self.store.add(key, t, input);
    }

    /// Reports that the buffer identified by `(seq, chunk)` from `origin`
    /// has been fully ingested. Advances the watermark and, if it moved
    /// forward, fires the trigger for every window that newly closed,
    /// invoking `on_row` once per output row (spec component L).
    pub fn on_buffer_seen(
        &self,
        ts: WatermarkTimestamp,
        seq: SequenceNumber,
        chunk: ChunkNumber,
        terminal: bool,
        origin: OriginId,
        mut on_row: impl FnMut(WindowRow<'_, K, Agg::Final>),
    ) {
        self.watermark.update_watermark(ts, seq, chunk, terminal, origin);
        let curr = self.watermark.current_watermark().as_u64();
        let mut last = self.last_watermark.lock();
        if curr > *last {
            self.trigger.trigger(&self.store, *last, curr, &mut on_row);
            *last = curr;
        }
    }

    pub fn current_watermark(&self) -> WatermarkTimestamp {
        self.watermark.current_watermark()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sum;

    impl WindowAggregation for Sum {
        type Input = i64;
        type Partial = i64;
        type Final = i64;

        fn initial(&self) -> i64 {
            0
        }

        fn add(&self, partial: &mut i64, input: &i64) {
            *partial += input;
        }

        fn combine(&self, left: &i64, right: &i64) -> i64 {
            left + right
        }

        fn lower(&self, partial: &i64) -> i64 {
            *partial
        }
    }

    #[test]
    fn single_origin_tumbling_window_end_to_end() {
        let operator = WindowOperator::new([OriginId::new(0)], WindowAssigner::tumbling(10), Arc::new(Sum), false);
        operator.ingest("k", 1, &3i64);
        operator.ingest("k", 4, &4i64);
        operator.ingest("k", 12, &100i64);

        let mut rows = Vec::new();
        operator.on_buffer_seen(
            WatermarkTimestamp::new(10),
            SequenceNumber::new(1),
            ChunkNumber::new(1),
            true,
            OriginId::new(0),
            |row| rows.push((row.start_ts, row.end_ts, row.value)),
        );

        assert_eq!(rows, vec![(0, 10, 7)]);
        assert_eq!(operator.current_watermark(), WatermarkTimestamp::new(10));
    }

    #[test]
    fn multi_origin_window_waits_for_the_slower_origin() {
        let operator = WindowOperator::new([OriginId::new(0), OriginId::new(1)], WindowAssigner::tumbling(10), Arc::new(Sum), false);
        operator.ingest("k", 1, &1i64);
        operator.ingest("k", 2, &1i64);

        let mut rows = Vec::new();
        operator.on_buffer_seen(WatermarkTimestamp::new(10), SequenceNumber::new(1), ChunkNumber::new(1), true, OriginId::new(0), |row| {
            rows.push(row.value)
        });
        assert!(rows.is_empty(), "window must not close until every origin has advanced past it");

        operator.on_buffer_seen(WatermarkTimestamp::new(10), SequenceNumber::new(1), ChunkNumber::new(1), true, OriginId::new(1), |row| {
            rows.push(row.value)
        });
        assert_eq!(rows, vec![2]);
    }
}
