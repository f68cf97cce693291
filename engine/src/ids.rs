use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Monotonically assigned 64-bit query identity (spec §6: "`QueryId` is a
/// monotonically assigned 64-bit ID").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryId(u64);

impl QueryId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for QueryId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryId({})", self.0)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Issues strictly increasing [`QueryId`]s for one engine instance. Not a
/// process-wide singleton -- each `QueryEngine` owns its own generator, per
/// the design note that the engine must be instantiable without global
/// state.
pub struct QueryIdGenerator {
    next: AtomicU64,
}

impl QueryIdGenerator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> QueryId {
        QueryId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for QueryIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
