//! One-shot timer capability.
//!
//! Debouncing only needs "run this after a delay, unless cancelled first".
//! [`Timer`] is that capability; [`ThreadTimer`] and [`TokioTimer`] back it
//! with real time and [`ManualClock`] with a clock tests advance by hand.

mod manual;
mod thread;
mod tokio_timer;

pub use manual::ManualClock;
pub use thread::ThreadTimer;
pub use tokio_timer::TokioTimer;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// Schedules one-shot callbacks.
///
/// Implementations must not run `callback` before `after` has returned, and
/// must call [`TimerHandle::try_fire`] immediately before running it.
pub trait Timer: Send + Sync {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Unique identifier assigned to each scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

fn next_timer_id() -> TimerId {
    TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
}

const SCHEDULED: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

struct HandleState {
    status: AtomicU8,
    on_cancel: Mutex<Option<CancelHook>>,
}

/// Cancellation token for one scheduled callback.
///
/// Firing and cancelling race through a single atomic transition, so exactly
/// one of them wins: once `cancel` returns `true` the callback never starts.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    state: Arc<HandleState>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self {
            id: next_timer_id(),
            state: Arc::new(HandleState {
                status: AtomicU8::new(SCHEDULED),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Cancel the callback. Returns `false` if it already fired or was
    /// cancelled before.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .status
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(hook) = self.state.on_cancel.lock().take() {
                hook();
            }
        }
        won
    }

    /// Claim the right to run the callback. Timer implementations call this
    /// right before invoking it and skip the callback on `false`.
    pub fn try_fire(&self) -> bool {
        self.state
            .status
            .compare_exchange(SCHEDULED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Register cleanup to run if the handle is cancelled, such as releasing
    /// the backing task. Runs immediately if cancellation already happened.
    pub fn set_cancel_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.state.on_cancel.lock();
        if self.is_cancelled() {
            drop(slot);
            hook();
        } else {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == SCHEDULED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == CANCELLED
    }

    pub fn has_fired(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == FIRED
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.state.status.load(Ordering::Acquire) {
            SCHEDULED => "scheduled",
            CANCELLED => "cancelled",
            _ => "fired",
        };
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("status", &status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn cancel_and_fire_are_exclusive() {
        let handle = TimerHandle::new();
        assert!(handle.cancel());
        assert!(!handle.try_fire());
        assert!(!handle.cancel());

        let handle = TimerHandle::new();
        assert!(handle.try_fire());
        assert!(!handle.cancel());
        assert!(handle.has_fired());
    }

    #[test]
    fn cancel_hook_runs_once_even_when_late() {
        let ran = Arc::new(AtomicBool::new(false));
        let handle = TimerHandle::new();
        let flag = Arc::clone(&ran);
        handle.set_cancel_hook(move || flag.store(true, Ordering::SeqCst));
        assert!(handle.cancel());
        assert!(ran.load(Ordering::SeqCst));

        let late = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&late);
        handle.set_cancel_hook(move || flag.store(true, Ordering::SeqCst));
        assert!(late.load(Ordering::SeqCst));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(TimerHandle::new().id(), TimerHandle::new().id());
    }
}
