use std::any::Any;

/// Opaque per-pipeline operator state (e.g. a window aggregate's partial
/// state, a join build side). The engine only ever moves these around by
/// `Arc`; it never inspects them. `as_any` lets a stage's own code recover
/// its concrete handler type.
pub trait OperatorHandler: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> OperatorHandler for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
