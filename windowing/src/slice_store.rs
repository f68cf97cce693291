use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// A user-supplied incremental aggregation (spec's `ExecutableWindowAggregation`):
/// `add` folds one input record into a partial aggregate, `combine` merges two
/// partials from adjacent slices, `lower` projects a partial into the
/// user-visible output type. All three are pure functions of their arguments;
/// the store never inspects `Partial`/`Final` beyond cloning and combining
/// them.
pub trait WindowAggregation: Send + Sync {
    type Input;
    type Partial: Clone + Send;
    type Final;

    fn initial(&self) -> Self::Partial;
    fn add(&self, partial: &mut Self::Partial, input: &Self::Input);
    fn combine(&self, left: &Self::Partial, right: &Self::Partial) -> Self::Partial;
    fn lower(&self, partial: &Self::Partial) -> Self::Final;
}

/// A tumbling or sliding event-time window definition (spec component K).
/// Slices -- the store's actual unit of retention -- are the `gcd(size,
/// slide)` panes for a sliding window, and the whole window for a tumbling
/// one (`slide == size`, so `gcd(size, size) == size`).
#[derive(Clone, Copy, Debug)]
pub enum WindowAssigner {
    Tumbling { size: u64 },
    Sliding { size: u64, slide: u64 },
}

impl WindowAssigner {
    pub fn tumbling(size: u64) -> Self {
        assert!(size > 0, "tumbling window size must be positive");
        Self::Tumbling { size }
    }

    pub fn sliding(size: u64, slide: u64) -> Self {
        assert!(size > 0 && slide > 0, "sliding window size/slide must be positive");
        Self::Sliding { size, slide }
    }

    fn window_size(&self) -> u64 {
        match self {
            Self::Tumbling { size } => *size,
            Self::Sliding { size, .. } => *size,
        }
    }

    pub(crate) fn slide(&self) -> u64 {
        match self {
            Self::Tumbling { size } => *size,
            Self::Sliding { slide, .. } => *slide,
        }
    }

    fn pane_size(&self) -> u64 {
        match self {
            Self::Tumbling { size } => *size,
            Self::Sliding { size, slide } => gcd(*size, *slide),
        }
    }

    /// `[start, end)` of the slice containing event time `t`.
    fn slice_bounds(&self, t: u64) -> (u64, u64) {
        let pane = self.pane_size();
        let start = (t / pane) * pane;
        (start, start + pane)
    }

    /// Windows whose `endTs` lies in `(prev_watermark, curr_watermark]`, in
    /// ascending `startTs` order.
    pub fn windows_closing_in(&self, prev_watermark: u64, curr_watermark: u64) -> Vec<(u64, u64)> {
        if curr_watermark <= prev_watermark {
            return Vec::new();
        }
        let slide = self.slide();
        let size = self.window_size();
        let mut windows = Vec::new();
        let mut end = (prev_watermark / slide + 1) * slide;
        while end <= curr_watermark {
            if end >= size {
                windows.push((end - size, end));
            }
            end += slide;
        }
        windows
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

struct Slice<P> {
    start_ts: u64,
    end_ts: u64,
    partial: P,
    record_count: u64,
}

/// Per-key, chronologically ordered partial aggregates (spec component K).
/// Each key's slices are non-overlapping and contiguous; new slices are
/// created lazily on first touch. Keyed by an externally supplied key type
/// so the same store serves both keyed and non-keyed (single implicit key)
/// windows.
pub struct WindowSliceStore<K, Agg: WindowAggregation> {
    assigner: WindowAssigner,
    aggregation: Arc<Agg>,
    per_key: Mutex<HashMap<K, Vec<Slice<Agg::Partial>>>>,
}

impl<K, Agg> WindowSliceStore<K, Agg>
where
    K: Eq + Hash + Clone,
    Agg: WindowAggregation,
{
    pub fn new(assigner: WindowAssigner, aggregation: Arc<Agg>) -> Self {
        Self {
            assigner,
            aggregation,
            per_key: Mutex::new(HashMap::new()),
        }
    }

    /// Folds `input`, observed at event time `t`, into the slice of `key`
    /// that contains `t`, creating the slice if this is its first record.
    pub fn add(&self, key: K, t: u64, input: &Agg::Input) {
        let (start, end) = self.assigner.slice_bounds(t);
        let mut per_key = self.per_key.lock();
        let slices = per_key.entry(key).or_default();
        match slices.binary_search_by_key(&start, |s| s.start_ts) {
            Ok(idx) => {
                self.aggregation.add(&mut slices[idx].partial, input);
                slices[idx].record_count += 1;
            }
            Err(idx) => {
                let mut partial = self.aggregation.initial();
                self.aggregation.add(&mut partial, input);
                slices.insert(
                    idx,
                    Slice {
                        start_ts: start,
                        end_ts: end,
                        partial,
                        record_count: 1,
                    },
                );
            }
        }
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.per_key.lock().keys().cloned().collect()
    }

    pub(crate) fn aggregation_lower(&self, partial: &Agg::Partial) -> Agg::Final {
        self.aggregation.lower(partial)
    }

    /// Combines every slice of `key` fully contained in `[window_start,
    /// window_end)`. Returns `None` if no non-empty slice qualifies.
    pub(crate) fn combine_window(&self, key: &K, window_start: u64, window_end: u64) -> Option<(Agg::Partial, u64)> {
        let per_key = self.per_key.lock();
        let slices = per_key.get(key)?;
        let mut acc: Option<Agg::Partial> = None;
        let mut count = 0u64;
        for slice in slices {
            if slice.record_count == 0 || slice.start_ts < window_start || slice.end_ts > window_end {
                continue;
            }
            count += slice.record_count;
            acc = Some(match acc {
                None => slice.partial.clone(),
                Some(ref prev) => self.aggregation.combine(prev, &slice.partial),
            });
        }
        acc.map(|partial| (partial, count))
    }

    /// Drops slices that end at or before `threshold` (spec: "evict slices
    /// strictly older than `largestClosedWindow - slide`").
    pub(crate) fn evict_older_than(&self, threshold: u64) {
        let mut per_key = self.per_key.lock();
        for slices in per_key.values_mut() {
            slices.retain(|s| s.end_ts > threshold);
        }
        per_key.retain(|_, slices| !slices.is_empty());
    }

    #[cfg(test)]
    fn slice_count(&self, key: &K) -> usize {
        self.per_key.lock().get(key).map_or(0, |v| v.len())
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
    fn tumbling_window_gcd_is_the_window_size() {
        let assigner = WindowAssigner::tumbling(10);
        assert_eq!(assigner.slice_bounds(5), (0, 10));
        assert_eq!(assigner.slice_bounds(15), (10, 20));
    }

    #[test]
    fn sliding_window_panes_are_the_gcd_of_size_and_slide() {
        // size=10, slide=4 -> pane size gcd(10,4) = 2
        let assigner = WindowAssigner::sliding(10, 4);
        assert_eq!(assigner.slice_bounds(5), (4, 6));
    }

    #[test]
    fn single_key_tumbling_sum_accumulates_within_one_slice() {
        let store = WindowSliceStore::new(WindowAssigner::tumbling(10), Arc::new(Sum));
        for v in [1, 2, 3, 4] {
            store.add("k", 2, &v);
        }
        assert_eq!(store.slice_count(&"k"), 1);
        let (partial, count) = store.combine_window(&"k", 0, 10).unwrap();
        assert_eq!(partial, 10);
        assert_eq!(count, 4);
    }

    #[test]
    fn combine_window_ignores_slices_outside_bounds() {
        let store = WindowSliceStore::new(WindowAssigner::tumbling(10), Arc::new(Sum));
        store.add("k", 5, &1i64);
        store.add("k", 15, &100i64);
        let (partial, count) = store.combine_window(&"k", 0, 10).unwrap();
        assert_eq!(partial, 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn eviction_drops_only_slices_ending_at_or_before_threshold() {
        let store = WindowSliceStore::new(WindowAssigner::tumbling(10), Arc::new(Sum));
        store.add("k", 5, &1i64);
        store.add("k", 25, &1i64);
        assert_eq!(store.slice_count(&"k"), 2);
        store.evict_older_than(10);
        assert_eq!(store.slice_count(&"k"), 1);
    }

    #[test]
    fn windows_closing_in_returns_ascending_nonoverlapping_tumbling_windows() {
        let assigner = WindowAssigner::tumbling(10);
        assert_eq!(assigner.windows_closing_in(0, 25), vec![(0, 10), (10, 20)]);
        assert_eq!(assigner.windows_closing_in(20, 20), Vec::<(u64, u64)>::new());
    }
}
