use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use coalesce_utils::panic_message;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use super::error::{BoxError, DeferredExecutionError};
use super::metrics::{DebounceMetrics, DebounceStats};
use crate::timer::{Timer, TimerHandle};

pub type DeferredFn<A> = Box<dyn Fn(A) -> Result<(), BoxError> + Send + Sync>;

/// Receives failures of deferred invocations.
pub type ErrorHandler = Arc<dyn Fn(&DeferredExecutionError) + Send + Sync>;

struct PendingCall<A> {
    args: Option<A>,
    handle: Option<TimerHandle>,
    /// Bumped on every call, cancel and flush; a timer whose generation no
    /// longer matches lost a race with one of those and must not deliver.
    generation: u64,
}

struct DebounceInner<A> {
    func: DeferredFn<A>,
    timer: Arc<dyn Timer>,
    delay: Duration,
    state: Mutex<PendingCall<A>>,
    on_error: RwLock<ErrorHandler>,
    metrics: DebounceMetrics,
}

/// Collapses bursts of calls into one delayed invocation with the latest
/// arguments.
///
/// Clones share one pending call. Dropping the last clone cancels whatever is
/// still pending, so keep a clone alive for as long as invocations matter.
pub struct Debouncer<A: Send + 'static> {
    inner: Arc<DebounceInner<A>>,
}

impl<A: Send + 'static> Debouncer<A> {
    pub fn new<T, F>(timer: Arc<T>, delay: Duration, func: F) -> Self
    where
        T: Timer + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::from_boxed(
            timer,
            delay,
            Box::new(move |args: A| -> Result<(), BoxError> {
                func(args);
                Ok(())
            }),
        )
    }

    /// Debounce a function whose errors go to the error handler.
    pub fn fallible<T, F, E>(timer: Arc<T>, delay: Duration, func: F) -> Self
    where
        T: Timer + 'static,
        F: Fn(A) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_boxed(
            timer,
            delay,
            Box::new(move |args: A| -> Result<(), BoxError> { func(args).map_err(Into::into) }),
        )
    }

    fn from_boxed<T>(timer: Arc<T>, delay: Duration, func: DeferredFn<A>) -> Self
    where
        T: Timer + 'static,
    {
        Self {
            inner: Arc::new(DebounceInner {
                func,
                timer,
                delay,
                state: Mutex::new(PendingCall {
                    args: None,
                    handle: None,
                    generation: 0,
                }),
                on_error: RwLock::new(Arc::new(log_deferred_error) as ErrorHandler),
                metrics: DebounceMetrics::default(),
            }),
        }
    }

    pub fn with_error_handler<H>(self, handler: H) -> Self
    where
        H: Fn(&DeferredExecutionError) + Send + Sync + 'static,
    {
        self.set_error_handler(handler);
        self
    }

    /// Replace the failure channel for every clone of this debouncer.
    pub fn set_error_handler<H>(&self, handler: H)
    where
        H: Fn(&DeferredExecutionError) + Send + Sync + 'static,
    {
        *self.inner.on_error.write() = Arc::new(handler);
    }

    /// Record `args` as the pending call and restart the delay.
    pub fn call(&self, args: A) {
        let inner = &self.inner;
        inner.metrics.record_call();

        let mut state = inner.state.lock();
        let generation = state.generation.wrapping_add(1);

        // A timer that panics here must leave the previous call intact.
        let weak: Weak<DebounceInner<A>> = Arc::downgrade(inner);
        let handle = inner.timer.after(
            inner.delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(generation);
                }
            }),
        );
        trace!(timer = handle.id().raw(), delay = ?inner.delay, "debounce rescheduled");

        if let Some(previous) = state.handle.replace(handle) {
            if previous.cancel() {
                inner.metrics.record_superseded();
            }
        }
        state.args = Some(args);
        state.generation = generation;
    }

    /// Drop the pending call without running it. Returns whether one existed.
    pub fn cancel(&self) -> bool {
        let inner = &self.inner;
        let was_pending = inner.take_pending().is_some();
        if was_pending {
            inner.metrics.record_cancel();
            debug!("debounced call cancelled");
        }
        was_pending
    }

    /// Run the pending call now on this thread instead of waiting for the
    /// timer. Returns whether anything ran.
    pub fn flush(&self) -> bool {
        match self.inner.take_pending() {
            Some(args) => {
                self.inner.invoke(args);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().args.is_some()
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    pub fn stats(&self) -> DebounceStats {
        self.inner.metrics.snapshot()
    }
}

impl<A: Send + 'static> DebounceInner<A> {
    fn fire(&self, generation: u64) {
        let args = {
            let mut state = self.state.lock();
            if state.generation != generation {
                trace!("stale debounce timer ignored");
                return;
            }
            state.handle = None;
            match state.args.take() {
                Some(args) => args,
                None => return,
            }
        };
        self.invoke(args);
    }

    fn take_pending(&self) -> Option<A> {
        let mut state = self.state.lock();
        if let Some(handle) = state.handle.take() {
            handle.cancel();
        }
        state.generation = state.generation.wrapping_add(1);
        state.args.take()
    }

    /// Runs outside the state lock so the wrapped function may call back into
    /// the debouncer.
    fn invoke(&self, args: A) {
        self.metrics.record_invocation();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.func)(args)));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => DeferredExecutionError::Failed(err),
            Err(payload) => DeferredExecutionError::Panicked(panic_message(payload.as_ref())),
        };

        self.metrics.record_failure();
        let handler = Arc::clone(&*self.on_error.read());
        handler(&failure);
    }
}

impl<A> Drop for DebounceInner<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(handle) = state.handle.take() {
            handle.cancel();
        }
        state.args = None;
    }
}

impl<A: Send + 'static> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Send + 'static> fmt::Debug for Debouncer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.inner.delay)
            .field("pending", &self.is_pending())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn log_deferred_error(err: &DeferredExecutionError) {
    error!(error = %err, "debounced invocation failed");
}
