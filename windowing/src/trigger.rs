use std::hash::Hash;

use crate::slice_store::{WindowAggregation, WindowAssigner, WindowSliceStore};

/// Materializes every window that closes as the watermark advances from
/// `prev` to `curr` (spec component L). Holds no state of its own beyond
/// the window definition and whether downstream distribution is
/// "merging" (partial aggregates combined further downstream, so the
/// output row carries a record count) or "complete" (fully finalized, no
/// count column).
pub struct CompleteAggregationTrigger<Agg: WindowAggregation> {
    assigner: WindowAssigner,
    merging: bool,
    _aggregation: std::marker::PhantomData<Agg>,
}

/// One materialized output row: `startTs, endTs, key, value[, count]`
/// (spec component L's output row schema). `count` is `Some` only under
/// the "merging" distribution strategy.
pub struct WindowRow<'a, K, F> {
    pub start_ts: u64,
    pub end_ts: u64,
    pub key: &'a K,
    pub value: F,
    pub count: Option<u64>,
}

impl<Agg: WindowAggregation> CompleteAggregationTrigger<Agg> {
    pub fn new(assigner: WindowAssigner, merging: bool) -> Self {
        Self {
            assigner,
            merging,
            _aggregation: std::marker::PhantomData,
        }
    }

    /// Enumerates windows closing in `(prev_watermark, curr_watermark]`,
    /// combines every key's slices for each, and invokes `on_row` once per
    /// non-empty window/key in ascending `startTs` order (ties broken by
    /// key order via `K: Ord`) so downstream merging stays monotonic. After
    /// emitting, evicts slices strictly older than
    /// `largestClosedWindow - slide` from `store`.
    pub fn trigger<K>(&self, store: &WindowSliceStore<K, Agg>, prev_watermark: u64, curr_watermark: u64, mut on_row: impl FnMut(WindowRow<'_, K, Agg::Final>))
    where
        K: Eq + Hash + Clone + Ord,
    {
        let windows = self.assigner.windows_closing_in(prev_watermark, curr_watermark);
        if windows.is_empty() {
            return;
        }

        let mut keys = store.keys();
        keys.sort();

        let mut largest_closed_window = 0u64;
        for &(start, end) in &windows {
            largest_closed_window = largest_closed_window.max(end);
            for key in &keys {
                let Some((partial, count)) = store.combine_window(key, start, end) else {
                    continue;
                };
                if count == 0 {
                    continue;
                }
                let value = store.aggregation_lower(&partial);
                on_row(WindowRow {
                    start_ts: start,
                    end_ts: end,
                    key,
                    value,
                    count: self.merging.then_some(count),
                });
            }
        }

        if largest_closed_window > 0 {
            let slide = self.assigner.slide();
            store.evict_older_than(largest_closed_window.saturating_sub(slide));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

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
    fn single_origin_tumbling_sum_emits_one_row_per_closed_window() {
        let assigner = WindowAssigner::tumbling(10);
        let store = WindowSliceStore::new(assigner, Arc::new(Sum));
        for (t, v) in [(1, 3), (4, 4), (12, 10)] {
            store.add("k", t, &v);
        }

        let trigger = CompleteAggregationTrigger::new(assigner, false);
        let mut rows = Vec::new();
        trigger.trigger(&store, 0, 10, |row| rows.push((row.start_ts, row.end_ts, row.value, row.count)));

        assert_eq!(rows, vec![(0, 10, 7, None)]);
    }

    #[test]
    fn no_rows_emitted_when_watermark_does_not_advance() {
        let assigner = WindowAssigner::tumbling(10);
        let store = WindowSliceStore::new(assigner, Arc::new(Sum));
        store.add("k", 1, &3i64);

        let trigger = CompleteAggregationTrigger::new(assigner, false);
        let mut rows = Vec::new();
        trigger.trigger(&store, 10, 10, |row| rows.push((row.start_ts, row.value)));
        assert!(rows.is_empty());
    }

    #[test]
    fn merging_distribution_carries_a_record_count() {
        let assigner = WindowAssigner::tumbling(10);
        let store = WindowSliceStore::new(assigner, Arc::new(Sum));
        store.add("a", 1, &1i64);
        store.add("a", 2, &1i64);
        store.add("b", 3, &5i64);

        let trigger = CompleteAggregationTrigger::new(assigner, true);
        let mut rows = Vec::new();
        trigger.trigger(&store, 0, 10, |row| rows.push((row.key.to_string(), row.value, row.count)));

        assert_eq!(rows, vec![("a".to_string(), 2, Some(2)), ("b".to_string(), 5, Some(1))]);
    }
}
