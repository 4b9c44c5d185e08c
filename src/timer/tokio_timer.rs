use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};

use super::{Timer, TimerCallback, TimerHandle};

/// Timer that parks each callback in a `tokio::time::sleep` task.
///
/// Cancelling a handle aborts its task. Callbacks run on the runtime's
/// workers, so they should not block for long.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Timer for TokioTimer {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let task_handle = handle.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if task_handle.try_fire() {
                callback();
            }
        });

        let abort = task.abort_handle();
        handle.set_cancel_hook(move || abort.abort());
        handle
    }
}
