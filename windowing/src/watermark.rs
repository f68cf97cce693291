use std::collections::{BTreeSet, HashMap};

use nebula_unsafe_collection::{ChunkNumber, OriginId, SequenceNumber, WatermarkTimestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::WindowError;

/// Bookkeeping for one (origin, sequenceNumber) still waiting on its
/// terminal chunk, or on a gap among the chunks it has already seen.
#[derive(Default)]
struct PendingSequence {
    chunks_seen: BTreeSet<u64>,
    terminal_chunk: Option<u64>,
    watermark: WatermarkTimestamp,
}

impl PendingSequence {
    fn is_complete(&self) -> bool {
        match self.terminal_chunk {
            Some(terminal) => (1..=terminal).all(|c| self.chunks_seen.contains(&c)),
            None => false,
        }
    }
}

struct OriginState {
    /// Largest sequence number for which every chunk up to and including
    /// its terminal chunk has been seen. `0` means nothing has closed yet
    /// (sequence numbers start at [`SequenceNumber::INITIAL`] == 1).
    current_sequence: u64,
    current_watermark: WatermarkTimestamp,
    pending: HashMap<u64, PendingSequence>,
}

impl OriginState {
    fn new() -> Self {
        Self {
            current_sequence: 0,
            current_watermark: WatermarkTimestamp::default(),
            pending: HashMap::new(),
        }
    }

    fn update(&mut self, ts: WatermarkTimestamp, seq: SequenceNumber, chunk: ChunkNumber, terminal: bool) {
        let seq = seq.as_u64();
        if seq <= self.current_sequence {
            // Superseded by an already-closed sequence number; the original
            // engine treats this as a stale/duplicate delivery and drops it.
            return;
        }

        let entry = self.pending.entry(seq).or_default();
        entry.chunks_seen.insert(chunk.as_u64());
        entry.watermark = entry.watermark.max(ts);
        if terminal {
            entry.terminal_chunk = Some(chunk.as_u64());
        }

        while let Some(p) = self.pending.get(&(self.current_sequence + 1)) {
            if !p.is_complete() {
                break;
            }
            let next = self.current_sequence + 1;
            let p = self.pending.remove(&next).expect("just observed under the same lock");
            self.current_sequence = next;
            self.current_watermark = p.watermark;
        }
    }

    fn snapshot(&self) -> OriginSnapshot {
        let mut pending: Vec<PendingSnapshot> = self
            .pending
            .iter()
            .map(|(seq, p)| PendingSnapshot {
                sequence: *seq,
                chunks_seen: p.chunks_seen.iter().copied().collect(),
                terminal_chunk: p.terminal_chunk,
                watermark: p.watermark.as_u64(),
            })
            .collect();
        pending.sort_by_key(|p| p.sequence);
        OriginSnapshot {
            current_sequence: self.current_sequence,
            current_watermark: self.current_watermark.as_u64(),
            pending,
        }
    }

    fn restore(snapshot: OriginSnapshot) -> Self {
        let pending = snapshot
            .pending
            .into_iter()
            .map(|p| {
                (
                    p.sequence,
                    PendingSequence {
                        chunks_seen: p.chunks_seen.into_iter().collect(),
                        terminal_chunk: p.terminal_chunk,
                        watermark: WatermarkTimestamp::new(p.watermark),
                    },
                )
            })
            .collect();
        Self {
            current_sequence: snapshot.current_sequence,
            current_watermark: WatermarkTimestamp::new(snapshot.current_watermark),
            pending,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PendingSnapshot {
    sequence: u64,
    chunks_seen: Vec<u64>,
    terminal_chunk: Option<u64>,
    watermark: u64,
}

#[derive(Serialize, Deserialize)]
struct OriginSnapshot {
    current_sequence: u64,
    current_watermark: u64,
    pending: Vec<PendingSnapshot>,
}

/// Serializable form of a whole processor's state, version-tagged so a
/// future on-disk format change can be detected on restore (spec §6
/// "persisted artifacts").
#[derive(Serialize, Deserialize)]
pub struct WatermarkSnapshot {
    version: u8,
    origins: Vec<(u64, OriginSnapshot)>,
}

/// Tracks per-origin ingestion progress and exposes the engine-visible
/// watermark as the minimum over origins (spec component J). Each origin's
/// state is behind its own [`parking_lot::Mutex`] so writers for distinct
/// origins never contend with each other, only `getCurrentWatermark`
/// briefly visits every lock in turn.
pub struct MultiOriginWatermarkProcessor {
    origins: HashMap<OriginId, Mutex<OriginState>>,
}

impl MultiOriginWatermarkProcessor {
    pub fn new(origins: impl IntoIterator<Item = OriginId>) -> Self {
        Self {
            origins: origins.into_iter().map(|o| (o, Mutex::new(OriginState::new()))).collect(),
        }
    }

    /// Records that the buffer identified by `(seq, chunk)` from `origin`,
    /// carrying event-time watermark `ts`, has been fully seen. Updates to
    /// an unconfigured origin are logged and dropped rather than panicking
    /// -- the set of origins is fixed at construction (spec §4.J).
    pub fn update_watermark(&self, ts: WatermarkTimestamp, seq: SequenceNumber, chunk: ChunkNumber, terminal: bool, origin: OriginId) {
        let Some(state) = self.origins.get(&origin) else {
            tracing::warn!(%origin, "watermark update for an origin outside the configured set");
            return;
        };
        state.lock().update(ts, seq, chunk, terminal);
    }

    /// The minimum, across all configured origins, of the watermark
    /// associated with that origin's greatest fully-closed sequence number.
    /// `WatermarkTimestamp::default()` (zero) if any origin has not yet
    /// closed a single sequence number.
    pub fn current_watermark(&self) -> WatermarkTimestamp {
        self.origins
            .values()
            .map(|state| state.lock().current_watermark)
            .min()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> WatermarkSnapshot {
        let mut origins: Vec<(u64, OriginSnapshot)> = self.origins.iter().map(|(origin, state)| (origin.as_u64(), state.lock().snapshot())).collect();
        origins.sort_by_key(|(origin, _)| *origin);
        WatermarkSnapshot { version: 1, origins }
    }

    /// Overwrites this processor's state with `snapshot`, origin by origin.
    /// Origins present in the snapshot but not in this processor's
    /// configured set are ignored with a warning.
    pub fn restore(&self, snapshot: WatermarkSnapshot) {
        for (origin, origin_snapshot) in snapshot.origins {
            match self.origins.get(&OriginId::new(origin)) {
                Some(state) => *state.lock() = OriginState::restore(origin_snapshot),
                None => tracing::warn!(origin, "snapshot contains an origin outside the configured set, ignoring"),
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, WindowError> {
        bincode::serialize(&self.snapshot()).map_err(WindowError::new)
    }

    pub fn restore_from_bytes(&self, bytes: &[u8]) -> Result<(), WindowError> {
        let snapshot: WatermarkSnapshot = bincode::deserialize(bytes).map_err(WindowError::new)?;
        self.restore(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_data(n: u64) -> (SequenceNumber, ChunkNumber, bool) {
        (SequenceNumber::new(n), ChunkNumber::new(1), true)
    }

    #[test]
    fn single_origin_watermark_advances_monotonically() {
        let processor = MultiOriginWatermarkProcessor::new([OriginId::new(0)]);
        for i in 1..=100u64 {
            let old = processor.current_watermark();
            let (seq, chunk, terminal) = seq_data(i);
            processor.update_watermark(WatermarkTimestamp::new(i), seq, chunk, terminal, OriginId::new(0));
            let new = processor.current_watermark();
            assert!(new >= old);
            assert!(new <= WatermarkTimestamp::new(i));
        }
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::new(100));
    }

    #[test]
    fn multi_origin_watermark_is_min_of_origins() {
        let origins = [OriginId::new(0), OriginId::new(1)];
        let processor = MultiOriginWatermarkProcessor::new(origins);
        processor.update_watermark(WatermarkTimestamp::new(10), SequenceNumber::new(1), ChunkNumber::new(1), true, OriginId::new(0));
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::default());

        processor.update_watermark(WatermarkTimestamp::new(3), SequenceNumber::new(1), ChunkNumber::new(1), true, OriginId::new(1));
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::new(3));
    }

    #[test]
    fn out_of_order_chunks_buffer_until_terminal_and_predecessors_arrive() {
        let processor = MultiOriginWatermarkProcessor::new([OriginId::new(0)]);
        let origin = OriginId::new(0);

        // seq 1 arrives out of chunk order: chunk 2 (terminal) before chunk 1.
        processor.update_watermark(WatermarkTimestamp::new(5), SequenceNumber::new(1), ChunkNumber::new(2), true, origin);
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::default());
        processor.update_watermark(WatermarkTimestamp::new(5), SequenceNumber::new(1), ChunkNumber::new(1), false, origin);
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::new(5));

        // seq 3 arrives before seq 2: watermark must not jump ahead.
        processor.update_watermark(WatermarkTimestamp::new(30), SequenceNumber::new(3), ChunkNumber::new(1), true, origin);
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::new(5));
        processor.update_watermark(WatermarkTimestamp::new(20), SequenceNumber::new(2), ChunkNumber::new(1), true, origin);
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::new(30));
    }

    /// Round-trip law: snapshot -> restore -> snapshot yields an identical
    /// serialization, not just an identical watermark.
    #[test]
    fn snapshot_restore_round_trip_preserves_watermark() {
        let processor = MultiOriginWatermarkProcessor::new([OriginId::new(0), OriginId::new(1)]);
        for i in 1..=50u64 {
            processor.update_watermark(WatermarkTimestamp::new(i), SequenceNumber::new(i), ChunkNumber::new(1), true, OriginId::new(0));
            processor.update_watermark(WatermarkTimestamp::new(i), SequenceNumber::new(i), ChunkNumber::new(1), true, OriginId::new(1));
        }
        let bytes = processor.serialize().unwrap();

        let restored = MultiOriginWatermarkProcessor::new([OriginId::new(0), OriginId::new(1)]);
        restored.restore_from_bytes(&bytes).unwrap();
        assert_eq!(processor.current_watermark(), restored.current_watermark());

        let bytes_again = restored.serialize().unwrap();
        assert_eq!(bytes, bytes_again, "re-serializing a restored snapshot must be byte-identical");
    }

    #[test]
    fn update_for_unconfigured_origin_is_ignored() {
        let processor = MultiOriginWatermarkProcessor::new([OriginId::new(0)]);
        processor.update_watermark(WatermarkTimestamp::new(99), SequenceNumber::new(1), ChunkNumber::new(1), true, OriginId::new(5));
        assert_eq!(processor.current_watermark(), WatermarkTimestamp::default());
    }
}
