use std::sync::atomic::{AtomicU64, Ordering};

/// What a single memoized call did, as reported to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Served from the store without invoking the wrapped function.
    Hit,
    /// The wrapped function ran and its value was returned.
    Miss,
    /// The wrapped function returned an error; nothing was stored.
    Failure,
    /// The arguments could not be turned into a key.
    KeyFailure,
    /// A stored value was dropped to make room.
    Evicted,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
    key_failures: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record(&self, event: CacheEvent) {
        let counter = match event {
            CacheEvent::Hit => &self.hits,
            CacheEvent::Miss => &self.misses,
            CacheEvent::Failure => &self.failures,
            CacheEvent::KeyFailure => &self.key_failures,
            CacheEvent::Evicted => &self.evictions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            key_failures: self.key_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a memoizer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub failures: u64,
    pub key_failures: u64,
}

impl CacheStats {
    /// Number of calls that produced a value, served or computed.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
