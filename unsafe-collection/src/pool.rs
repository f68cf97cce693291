use core::{cell::UnsafeCell, fmt};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::tuple_buffer::TupleBuffer;

/// Configuration for a [`BufferManager`]: every region is the same size,
/// there are a fixed number of them, and that number never changes for the
/// lifetime of the pool.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub buffer_size: usize,
    pub pool_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            pool_capacity: 1024,
        }
    }
}

/// Returned when [`BufferManager::get_buffer_blocking`] is woken up by
/// engine shutdown instead of by a freed region.
#[derive(Debug)]
pub struct ShutdownError;

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("buffer manager is shutting down")
    }
}

impl std::error::Error for ShutdownError {}

/// Point-in-time view of pool occupancy, consumed by the statistics
/// listener (component O of the design).
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferManagerMetrics {
    pub capacity: usize,
    pub live: usize,
    pub high_water_mark: usize,
}

struct Slot {
    storage: UnsafeCell<Box<[u8]>>,
}

// SAFETY: a slot's bytes are only ever reachable through the region index
// that the free-list hands out; the free-list's mutex+condvar guarantee
// at most one outstanding `Arc<RegionInner>` is minted per index at a time,
// so concurrent access to the same slot never happens.
unsafe impl Sync for Slot {}

pub(crate) struct PoolShared {
    buffer_size: usize,
    slots: Box<[Slot]>,
    free: Mutex<VecDeque<usize>>,
    not_empty: Condvar,
    live: AtomicUsize,
    high_water_mark: AtomicUsize,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl PoolShared {
    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub(crate) fn slot_ptr(&self, index: usize) -> *mut u8 {
        // SAFETY: index is only ever handed out by `acquire`/checked out of
        // the free-list, so it is in-bounds and not concurrently aliased.
        unsafe { (*self.slots[index].storage.get()).as_mut_ptr() }
    }

    pub(crate) fn release(&self, index: usize) {
        let mut free = self.free.lock();
        free.push_back(index);
        self.live.fetch_sub(1, Ordering::AcqRel);
        drop(free);
        self.not_empty.notify_one();
    }
}

/// Pooled fixed-size memory regions with refcounted [`TupleBuffer`] views
/// over them (spec component A). `get_buffer_blocking` is the engine's only
/// approved backpressure mechanism: when the pool is exhausted, callers
/// block here instead of allocating, and are released only when a buffer
/// elsewhere is dropped.
pub struct BufferManager {
    shared: Arc<PoolShared>,
}

impl BufferManager {
    pub fn new(config: PoolConfig) -> Self {
        assert!(config.pool_capacity > 0, "pool capacity must be non-zero");
        assert!(config.buffer_size > 0, "buffer size must be non-zero");

        let slots = (0..config.pool_capacity)
            .map(|_| Slot {
                storage: UnsafeCell::new(vec![0u8; config.buffer_size].into_boxed_slice()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let free = (0..config.pool_capacity).collect();

        debug!(capacity = config.pool_capacity, buffer_size = config.buffer_size, "buffer manager initialized");

        Self {
            shared: Arc::new(PoolShared {
                buffer_size: config.buffer_size,
                slots,
                free: Mutex::new(free),
                not_empty: Condvar::new(),
                live: AtomicUsize::new(0),
                high_water_mark: AtomicUsize::new(0),
                shutting_down: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Total number of equal-sized regions owned by this pool. Fixed for
    /// the manager's lifetime.
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Returns a fresh, zero-metadata buffer. Blocks the calling thread
    /// until a region is free. Only returns an error during engine
    /// shutdown, at which point waiters are woken and unwound rather than
    /// left blocked forever.
    pub fn get_buffer_blocking(&self) -> Result<TupleBuffer, ShutdownError> {
        let mut free = self.shared.free.lock();
        loop {
            if let Some(index) = free.pop_front() {
                return Ok(self.checkout(index));
            }
            if self.shared.shutting_down.load(Ordering::Acquire) {
                return Err(ShutdownError);
            }
            self.shared.not_empty.wait(&mut free);
        }
    }

    /// Non-blocking variant of [`Self::get_buffer_blocking`].
    pub fn try_get_buffer(&self) -> Option<TupleBuffer> {
        let mut free = self.shared.free.lock();
        let index = free.pop_front()?;
        Some(self.checkout(index))
    }

    fn checkout(&self, index: usize) -> TupleBuffer {
        let live = self.shared.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.high_water_mark.fetch_max(live, Ordering::AcqRel);
        TupleBuffer::fresh(self.shared.clone(), index, self.shared.buffer_size)
    }

    pub fn metrics(&self) -> BufferManagerMetrics {
        BufferManagerMetrics {
            capacity: self.capacity(),
            live: self.shared.live.load(Ordering::Acquire),
            high_water_mark: self.shared.high_water_mark.load(Ordering::Acquire),
        }
    }

    /// Wakes every thread blocked in [`Self::get_buffer_blocking`] with a
    /// [`ShutdownError`] instead of a buffer, so pipelines waiting on
    /// backpressure can unwind during engine shutdown.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        warn!("buffer manager shutting down, waking blocked acquirers");
        self.shared.not_empty.notify_all();
    }
}

impl Clone for BufferManager {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn manager(capacity: usize) -> BufferManager {
        BufferManager::new(PoolConfig {
            buffer_size: 16,
            pool_capacity: capacity,
        })
    }

    #[test]
    fn capacity_and_metrics_reflect_checked_out_buffers() {
        let pool = manager(2);
        let a = pool.get_buffer_blocking().unwrap();
        assert_eq!(pool.metrics().live, 1);
        let _b = pool.get_buffer_blocking().unwrap();
        assert_eq!(pool.metrics().live, 2);
        assert_eq!(pool.metrics().high_water_mark, 2);
        drop(a);
        assert_eq!(pool.metrics().live, 1);
    }

    #[test]
    fn try_get_buffer_returns_none_once_exhausted() {
        let pool = manager(1);
        let _a = pool.get_buffer_blocking().unwrap();
        assert!(pool.try_get_buffer().is_none());
    }

    /// Scenario 4: capacity = 2, three concurrent acquirers; the third only
    /// succeeds once one of the first two is released.
    #[test]
    fn a_third_acquirer_blocks_until_a_region_is_released() {
        let pool = manager(2);
        let first = pool.get_buffer_blocking().unwrap();
        let _second = pool.get_buffer_blocking().unwrap();

        let (tx, rx) = mpsc::channel();
        let pool_for_thread = pool.clone();
        let handle = thread::spawn(move || {
            let buf = pool_for_thread.get_buffer_blocking().unwrap();
            tx.send(()).unwrap();
            drop(buf);
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "third acquirer must not proceed while the pool is exhausted"
        );

        drop(first);
        rx.recv_timeout(Duration::from_secs(1)).expect("third acquirer unblocks once a region is freed");
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_blocked_acquirers_with_an_error() {
        let pool = manager(1);
        let _held = pool.get_buffer_blocking().unwrap();

        let pool_for_thread = pool.clone();
        let handle = thread::spawn(move || pool_for_thread.get_buffer_blocking().is_err());

        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert!(handle.join().unwrap(), "blocked acquirer must observe ShutdownError");
    }
}
