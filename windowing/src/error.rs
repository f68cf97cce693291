use std::fmt;

/// Failure raised by snapshot/restore of a [`crate::watermark::MultiOriginWatermarkProcessor`]
/// (spec component J's "serialization" clause). Opaque on purpose, the same
/// way `nebula_service::StageError` wraps whatever caused it rather than
/// exposing `bincode`'s error type across the crate boundary.
pub struct WindowError(Box<dyn std::error::Error + Send + Sync>);

impl WindowError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for WindowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}
