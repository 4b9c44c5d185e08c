use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct DebounceMetrics {
    calls: AtomicU64,
    invocations: AtomicU64,
    superseded: AtomicU64,
    cancelled: AtomicU64,
    failures: AtomicU64,
}

impl DebounceMetrics {
    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DebounceStats {
        DebounceStats {
            calls: self.calls.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceStats {
    /// Calls made through the wrapper.
    pub calls: u64,
    /// Times the wrapped function actually ran.
    pub invocations: u64,
    /// Pending invocations replaced by a newer call.
    pub superseded: u64,
    /// Pending invocations dropped by `cancel`.
    pub cancelled: u64,
    pub failures: u64,
}
