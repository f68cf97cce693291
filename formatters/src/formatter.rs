use nebula_unsafe_collection::{OriginId, SequenceNumber, TupleBuffer};

use crate::error::FormatError;
use crate::field::RowSchema;

/// Trailing bytes of a prior raw buffer that ended mid-tuple, retained
/// until the next delimiter closes them off (spec component M's
/// `stagedBuffers`). Held as owned bytes rather than a `TupleBuffer`
/// reference: the formatter only ever needs the fragment's content, not
/// the originating buffer's pooled memory.
struct Staged {
    bytes: Vec<u8>,
}

/// Scans raw delimited-text buffers for tuple and field boundaries,
/// reassembling tuples that span a buffer boundary (spec component M).
/// One instance is bound to a single input stream (one `OriginId`) and is
/// not `Sync` -- the owning pipeline stage serializes access the way any
/// other per-partition operator state is serialized.
pub struct SyncInputFormatter {
    origin: OriginId,
    tuple_delimiter: String,
    field_delimiter: String,
    schema: RowSchema,
    staged: Vec<Staged>,
    last_sequence: SequenceNumber,
}

impl SyncInputFormatter {
    pub fn new(origin: OriginId, tuple_delimiter: impl Into<String>, field_delimiter: impl Into<String>, schema: RowSchema) -> Self {
        let tuple_delimiter = tuple_delimiter.into();
        assert!(!tuple_delimiter.is_empty(), "tuple delimiter must be non-empty");
        Self {
            origin,
            tuple_delimiter,
            field_delimiter: field_delimiter.into(),
            schema,
            staged: Vec::new(),
            last_sequence: SequenceNumber::default(),
        }
    }

    pub fn origin(&self) -> OriginId {
        self.origin
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Parses one raw buffer, returning every tuple it yields in document
    /// order: first the spanning tuple assembled from everything staged so
    /// far plus this buffer's leading bytes (if any delimiter appears at
    /// all and something was staged), then every tuple found wholly inside
    /// this buffer. Raw buffers that contain no tuple delimiter at all are
    /// staged whole and yield nothing yet.
    ///
    /// Raw (not-yet-formatted) buffers store the number of valid bytes --
    /// not tuples -- in `get_number_of_tuples`, the same dual use the
    /// upstream source convention relies on before a buffer has been
    /// formatted.
    pub fn process(&mut self, raw: &TupleBuffer) -> Result<Vec<Vec<String>>, FormatError> {
        self.last_sequence = raw.sequence_number();

        let all_bytes = raw.as_bytes();
        let valid_len = if raw.get_number_of_tuples() > 0 {
            raw.get_number_of_tuples().min(all_bytes.len())
        } else {
            all_bytes.len()
        };
        let text = std::str::from_utf8(&all_bytes[..valid_len]).map_err(FormatError::invalid_utf8)?;

        let Some(first_delim) = text.find(&self.tuple_delimiter) else {
            self.staged.push(Staged { bytes: text.as_bytes().to_vec() });
            return Ok(Vec::new());
        };

        let mut tuples = Vec::new();

        if !self.staged.is_empty() {
            let mut spanning = String::new();
            for fragment in self.staged.drain(..) {
                spanning.push_str(std::str::from_utf8(&fragment.bytes).map_err(FormatError::invalid_utf8)?);
            }
            spanning.push_str(&text[..first_delim]);
            if !spanning.is_empty() {
                tuples.push(self.split_fields(&spanning)?);
            }
        }

        let delim_len = self.tuple_delimiter.len();
        let offsets: Vec<usize> = text.match_indices(&self.tuple_delimiter).map(|(i, _)| i).collect();
        let mut start = first_delim + delim_len;
        for &end in &offsets[1..] {
            let segment = &text[start..end];
            if !segment.is_empty() {
                tuples.push(self.split_fields(segment)?);
            }
            start = end + delim_len;
        }

        let last_delim = *offsets.last().expect("first_delim guarantees at least one match");
        let trailing = &text[last_delim + delim_len..];
        if !trailing.is_empty() {
            self.staged.push(Staged {
                bytes: trailing.as_bytes().to_vec(),
            });
        }

        Ok(tuples)
    }

    /// Flushes whatever is staged as a final spanning tuple (spec
    /// component M: "on engine-initiated stop, flush the final spanning
    /// tuple from all staged buffers"). Returns `None` if nothing was
    /// staged or the staged bytes were empty -- e.g. the last raw buffer
    /// ended exactly on a delimiter, leaving nothing to flush.
    pub fn flush_on_stop(&mut self) -> Result<Option<Vec<String>>, FormatError> {
        if self.staged.is_empty() {
            return Ok(None);
        }
        let mut spanning = String::new();
        for fragment in self.staged.drain(..) {
            spanning.push_str(std::str::from_utf8(&fragment.bytes).map_err(FormatError::invalid_utf8)?);
        }
        if spanning.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.split_fields(&spanning)?))
    }

    fn split_fields(&self, tuple_text: &str) -> Result<Vec<String>, FormatError> {
        let parts: Vec<&str> = tuple_text.split(self.field_delimiter.as_str()).collect();
        if parts.len() != self.schema.num_fields() {
            return Err(FormatError::field_count_mismatch(self.schema.num_fields(), parts.len()));
        }
        Ok(parts.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use nebula_unsafe_collection::{BufferManager, PoolConfig};

    fn manager() -> BufferManager {
        BufferManager::new(PoolConfig {
            buffer_size: 256,
            pool_capacity: 4,
        })
    }

    fn raw_buffer(pool: &BufferManager, seq: u64, text: &str) -> TupleBuffer {
        let mut buf = pool.get_buffer_blocking().unwrap();
        buf.as_bytes_mut()[..text.len()].copy_from_slice(text.as_bytes());
        buf.set_number_of_tuples(text.len());
        buf.set_sequence_number(SequenceNumber::new(seq));
        buf
    }

    fn schema() -> RowSchema {
        RowSchema::new(vec![FieldType::Int64, FieldType::VarChar(8)])
    }

    #[test]
    fn complete_tuples_within_one_buffer_are_parsed_immediately() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        let buf = raw_buffer(&pool, 1, "1,a\n2,b\n");
        let tuples = formatter.process(&buf).unwrap();
        assert_eq!(tuples, vec![vec!["1".to_string(), "a".to_string()], vec!["2".to_string(), "b".to_string()]]);
    }

    #[test]
    fn a_buffer_with_no_delimiter_stages_whole_and_emits_nothing() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        let buf = raw_buffer(&pool, 1, "1,a");
        assert!(formatter.process(&buf).unwrap().is_empty());
    }

    #[test]
    fn a_tuple_spanning_two_buffers_is_materialized_once_the_delimiter_arrives() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());

        let first = raw_buffer(&pool, 1, "1,a");
        assert!(formatter.process(&first).unwrap().is_empty());

        let second = raw_buffer(&pool, 2, "bc\n3,d\n");
        let tuples = formatter.process(&second).unwrap();
        assert_eq!(tuples, vec![vec!["1".to_string(), "abc".to_string()], vec!["3".to_string(), "d".to_string()]]);
    }

    #[test]
    fn a_tuple_spanning_three_buffers_concatenates_every_staged_fragment() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());

        assert!(formatter.process(&raw_buffer(&pool, 1, "1,a")).unwrap().is_empty());
        assert!(formatter.process(&raw_buffer(&pool, 2, "bc")).unwrap().is_empty());

        let tuples = formatter.process(&raw_buffer(&pool, 3, "de\n")).unwrap();
        assert_eq!(tuples, vec![vec!["1".to_string(), "abcde".to_string()]]);
    }

    #[test]
    fn stop_flushes_a_pending_spanning_tuple() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        assert!(formatter.process(&raw_buffer(&pool, 1, "1,a")).unwrap().is_empty());

        let flushed = formatter.flush_on_stop().unwrap();
        assert_eq!(flushed, Some(vec!["1".to_string(), "a".to_string()]));
        assert_eq!(formatter.flush_on_stop().unwrap(), None);
    }

    #[test]
    fn stop_with_nothing_staged_is_a_no_op() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        assert!(formatter.process(&raw_buffer(&pool, 1, "1,a\n")).unwrap().len() == 1);
        assert_eq!(formatter.flush_on_stop().unwrap(), None);
    }

    #[test]
    fn stop_when_the_last_buffer_ended_exactly_on_a_delimiter_flushes_nothing() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        assert!(formatter.process(&raw_buffer(&pool, 1, "1,a\n")).unwrap().len() == 1);
        assert_eq!(formatter.flush_on_stop().unwrap(), None);
    }

    #[test]
    fn wrong_field_count_is_reported_as_a_format_error() {
        let pool = manager();
        let mut formatter = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        let buf = raw_buffer(&pool, 1, "1,a,extra\n");
        assert!(formatter.process(&buf).is_err());
    }

    /// Round-trip law: concatenating raw buffers and reformatting as one
    /// equals the sequence produced by the incremental formatter.
    #[test]
    fn concatenating_raw_buffers_matches_the_incremental_sequence() {
        let pool = manager();
        let chunks = ["1,a", "bc\n2,d", "e\n3,f\n4,g", "h\n"];

        let mut incremental = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        let mut incremental_tuples = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            incremental_tuples.extend(incremental.process(&raw_buffer(&pool, i as u64, chunk)).unwrap());
        }
        assert!(incremental.flush_on_stop().unwrap().is_none());

        let whole = chunks.concat();
        let mut bulk = SyncInputFormatter::new(OriginId::new(1), "\n", ",", schema());
        let bulk_tuples = bulk.process(&raw_buffer(&pool, 0, &whole)).unwrap();

        assert_eq!(incremental_tuples, bulk_tuples);
    }
}
