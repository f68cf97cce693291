use core::fmt;

/// What happens to the owning pipeline when a tuple fails to parse (spec
/// §4.Q). `Skip` drops the offending tuple and keeps the query running;
/// `FailQuery` surfaces the error to the stage, which the engine turns into
/// a `Terminated{Failed}` transition (spec component D/§7).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Policy {
    Skip,
    FailQuery,
}

/// A tuple failed to parse against the configured schema: a field had the
/// wrong type, a tuple had the wrong number of fields, or a buffer's raw
/// bytes were not valid UTF-8. Never inspected by the engine -- only by the
/// formatter stage's own [`Policy`] and whatever status listener observes
/// the resulting query failure.
pub struct FormatError(String);

impl FormatError {
    pub(crate) fn bad_field(type_name: &str, value: &str) -> Self {
        Self(format!("failed to parse {type_name} field from {value:?}"))
    }

    pub(crate) fn field_count_mismatch(expected: usize, actual: usize) -> Self {
        Self(format!("tuple has {actual} fields, schema expects {expected}"))
    }

    pub(crate) fn invalid_utf8(err: std::str::Utf8Error) -> Self {
        Self(format!("raw buffer is not valid utf-8: {err}"))
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for FormatError {}
