use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a debounced function when its timer fired.
///
/// The call that scheduled the invocation has long returned, so this can
/// only be observed through the debouncer's error handler.
#[derive(Debug, Error)]
pub enum DeferredExecutionError {
    #[error("debounced function failed: {0}")]
    Failed(#[source] BoxError),
    #[error("debounced function panicked: {0}")]
    Panicked(String),
}

impl DeferredExecutionError {
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}
