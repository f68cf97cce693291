use std::sync::Arc;

use crate::{
    ids::{ChunkNumber, OriginId, SequenceNumber, WatermarkTimestamp},
    pool::PoolShared,
};

/// The checked-out region backing one or more [`TupleBuffer`] views. Its
/// `Drop` impl returns the region to the owning pool once the last view
/// referencing it goes away -- this is the refcount drop-to-zero release
/// described in spec component A.
struct Region {
    pool: Arc<PoolShared>,
    index: usize,
}

impl Drop for Region {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// A view over a fixed-size region of pooled memory, carrying a tuple
/// count and routing metadata (spec component B). Cloning a `TupleBuffer`
/// bumps the region's refcount; dropping it decrements.
#[derive(Clone)]
pub struct TupleBuffer {
    region: Arc<Region>,
    offset: usize,
    len: usize,
    num_tuples: usize,
    origin: OriginId,
    sequence_number: SequenceNumber,
    chunk_number: ChunkNumber,
    last_chunk: bool,
    watermark: WatermarkTimestamp,
}

impl TupleBuffer {
    pub(crate) fn fresh(pool: Arc<PoolShared>, index: usize, size: usize) -> Self {
        Self {
            region: Arc::new(Region { pool, index }),
            offset: 0,
            len: size,
            num_tuples: 0,
            origin: OriginId::default(),
            sequence_number: SequenceNumber::default(),
            chunk_number: ChunkNumber::default(),
            last_chunk: false,
            watermark: WatermarkTimestamp::default(),
        }
    }

    /// Immutable size in bytes of this view. Fixed for the buffer's
    /// lifetime (child slices aside, which carry their own fixed `len`).
    pub fn buffer_size(&self) -> usize {
        self.len
    }

    pub fn get_number_of_tuples(&self) -> usize {
        self.num_tuples
    }

    pub fn set_number_of_tuples(&mut self, n: usize) {
        self.num_tuples = n;
    }

    pub fn origin_id(&self) -> OriginId {
        self.origin
    }

    pub fn set_origin_id(&mut self, origin: OriginId) {
        self.origin = origin;
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, seq: SequenceNumber) {
        self.sequence_number = seq;
    }

    pub fn chunk_number(&self) -> ChunkNumber {
        self.chunk_number
    }

    pub fn set_chunk_number(&mut self, chunk: ChunkNumber) {
        self.chunk_number = chunk;
    }

    pub fn is_last_chunk(&self) -> bool {
        self.last_chunk
    }

    pub fn set_last_chunk(&mut self, last: bool) {
        self.last_chunk = last;
    }

    pub fn watermark(&self) -> WatermarkTimestamp {
        self.watermark
    }

    pub fn set_watermark(&mut self, ts: WatermarkTimestamp) {
        self.watermark = ts;
    }

    /// Raw byte view of the buffer's addressable region.
    pub fn as_bytes(&self) -> &[u8] {
        let ptr = self.region.pool.slot_ptr(self.region.index);
        // SAFETY: `offset + len` is checked not to exceed the backing
        // region's buffer_size at construction time (`fresh`/`make_child_slice`),
        // and this view is the sole borrower of that sub-range for its lifetime.
        unsafe { std::slice::from_raw_parts(ptr.add(self.offset), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let ptr = self.region.pool.slot_ptr(self.region.index);
        // SAFETY: see `as_bytes`.
        unsafe { std::slice::from_raw_parts_mut(ptr.add(self.offset), self.len) }
    }

    /// Typed view over the buffer's bytes. Caller must ensure `T`'s layout
    /// matches whatever previously wrote into this region; the debug
    /// assertion catches the common alignment/size mistakes.
    pub fn get_buffer<T>(&self) -> &[T] {
        let bytes = self.as_bytes();
        debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<T>(), 0, "buffer misaligned for T");
        let count = bytes.len() / std::mem::size_of::<T>().max(1);
        // SAFETY: pointer alignment checked above (debug builds), length
        // derived from the same region the bytes slice borrows from.
        unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast(), count) }
    }

    pub fn get_buffer_mut<T>(&mut self) -> &mut [T] {
        let bytes = self.as_bytes_mut();
        debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<T>(), 0, "buffer misaligned for T");
        let count = bytes.len() / std::mem::size_of::<T>().max(1);
        // SAFETY: see `get_buffer`.
        unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast(), count) }
    }

    /// Returns a new `TupleBuffer` viewing `[offset, offset + size)` of this
    /// buffer's bytes, bumping the parent region's refcount. The child
    /// inherits the parent's routing metadata as a starting point; callers
    /// that need distinct routing (e.g. a per-chunk formatter output) set
    /// it explicitly afterwards.
    ///
    /// # Panics
    /// Panics if `offset + size` exceeds this buffer's length -- this is an
    /// engine-internal invariant violation, not a runtime condition callers
    /// are expected to recover from.
    pub fn make_child_slice(&self, offset: usize, size: usize) -> TupleBuffer {
        assert!(offset + size <= self.len, "child slice out of bounds of parent buffer");
        TupleBuffer {
            region: self.region.clone(),
            offset: self.offset + offset,
            len: size,
            num_tuples: 0,
            origin: self.origin,
            sequence_number: self.sequence_number,
            chunk_number: self.chunk_number,
            last_chunk: self.last_chunk,
            watermark: self.watermark,
        }
    }
}

impl std::fmt::Debug for TupleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleBuffer")
            .field("origin", &self.origin)
            .field("sequence_number", &self.sequence_number)
            .field("chunk_number", &self.chunk_number)
            .field("last_chunk", &self.last_chunk)
            .field("num_tuples", &self.num_tuples)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferManager, PoolConfig};

    fn manager(capacity: usize) -> BufferManager {
        BufferManager::new(PoolConfig {
            buffer_size: 64,
            pool_capacity: capacity,
        })
    }

    #[test]
    fn fresh_buffer_has_zero_metadata() {
        let pool = manager(2);
        let buf = pool.get_buffer_blocking().unwrap();
        assert_eq!(buf.get_number_of_tuples(), 0);
        assert_eq!(buf.origin_id(), OriginId::default());
        assert!(!buf.is_last_chunk());
    }

    #[test]
    fn release_on_drop_returns_region_to_pool() {
        let pool = manager(1);
        assert_eq!(pool.metrics().live, 0);
        {
            let _buf = pool.get_buffer_blocking().unwrap();
            assert_eq!(pool.metrics().live, 1);
            assert!(pool.try_get_buffer().is_none());
        }
        assert_eq!(pool.metrics().live, 0);
        assert!(pool.try_get_buffer().is_some());
    }

    #[test]
    fn child_slice_bumps_refcount_and_shares_bytes() {
        let pool = manager(1);
        let mut parent = pool.get_buffer_blocking().unwrap();
        parent.set_origin_id(OriginId::new(7));
        parent.as_bytes_mut()[0] = 42;

        let child = parent.make_child_slice(0, 8);
        assert_eq!(child.origin_id(), OriginId::new(7));
        assert_eq!(child.as_bytes()[0], 42);

        drop(parent);
        // region still alive because child holds a strong ref
        assert_eq!(pool.metrics().live, 1);
        drop(child);
        assert_eq!(pool.metrics().live, 0);
    }

    #[test]
    fn pool_capacity_bounds_live_buffers() {
        let pool = manager(2);
        let _a = pool.get_buffer_blocking().unwrap();
        let _b = pool.get_buffer_blocking().unwrap();
        assert!(pool.try_get_buffer().is_none());
        assert_eq!(pool.metrics().live, 2);
    }
}
