//! Fixed-size pooled memory regions and the `TupleBuffer` view over them.
//!
//! This crate is the lowest layer of the engine: a [`BufferManager`] owns a
//! fixed number of equal-sized, aligned byte regions and hands out
//! [`TupleBuffer`] views over them. Buffers are reference counted; the
//! region returns to the pool when the last view is dropped. This is the
//! engine's only approved backpressure mechanism (see [`BufferManager::get_buffer_blocking`]).

mod ids;
mod pool;
mod tuple_buffer;

pub use ids::{ChunkNumber, OriginId, SequenceNumber, WatermarkTimestamp, INVALID_ORIGIN};
pub use pool::{BufferManager, BufferManagerMetrics, PoolConfig, ShutdownError};
pub use tuple_buffer::TupleBuffer;
