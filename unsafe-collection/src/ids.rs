use core::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }

            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(OriginId);
id_newtype!(SequenceNumber);
id_newtype!(ChunkNumber);
id_newtype!(WatermarkTimestamp);

/// Sentinel origin used by sources that do not participate in multi-origin
/// watermark bookkeeping (matches the original engine's `INVALID_ORIGIN_ID`).
pub const INVALID_ORIGIN: OriginId = OriginId(0);

impl SequenceNumber {
    pub const INITIAL: SequenceNumber = SequenceNumber(1);

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl ChunkNumber {
    pub const INITIAL: ChunkNumber = ChunkNumber(1);

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}
