use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::trace;

use super::key::{KeyStrategy, ValueKey};
use super::stats::{CacheCounters, CacheEvent, CacheStats};
use super::store::{Lookup, Store};
use super::{CacheObserver, MemoError};

pub type ComputeFn<A, R, E> = Box<dyn Fn(&A) -> Result<R, E> + Send + Sync>;

type SyncSlot<R> = OnceCell<Arc<R>>;

/// Wraps a function so calls with equal arguments reuse the first result.
///
/// Each key is computed at most once while its value stays stored. Callers
/// racing on the same key block until the single in-flight computation
/// finishes; other keys proceed independently. Errors are returned to the
/// caller and never stored.
///
/// Calling the same `Memoized` for the same key from inside its own wrapped
/// function deadlocks.
pub struct Memoized<A, R, E, S = ValueKey>
where
    S: KeyStrategy<A>,
{
    func: ComputeFn<A, R, E>,
    strategy: S,
    store: Mutex<Store<S::Key, SyncSlot<R>>>,
    counters: CacheCounters,
    observer: Option<CacheObserver>,
    _args: PhantomData<fn(&A)>,
}

/// Memoizes an infallible function keyed on its argument value.
pub fn memoize<A, R, F>(func: F) -> Memoized<A, R, Infallible, ValueKey>
where
    ValueKey: KeyStrategy<A>,
    R: Send + Sync + 'static,
    F: Fn(&A) -> R + Send + Sync + 'static,
{
    Memoized::new(move |args: &A| Ok(func(args)))
}

impl<A, R, E> Memoized<A, R, E, ValueKey>
where
    ValueKey: KeyStrategy<A>,
    R: Send + Sync + 'static,
{
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self::with_strategy(ValueKey, func)
    }
}

impl<A, R, E, S> Memoized<A, R, E, S>
where
    S: KeyStrategy<A>,
    R: Send + Sync + 'static,
{
    pub fn with_strategy<F>(strategy: S, func: F) -> Self
    where
        F: Fn(&A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
            strategy,
            store: Mutex::new(Store::new()),
            counters: CacheCounters::default(),
            observer: None,
            _args: PhantomData,
        }
    }

    /// Bound the store to `capacity` entries with LRU eviction.
    pub fn with_capacity(self, capacity: usize) -> Self {
        let evicted = self.store.lock().bound(capacity);
        for _ in 0..evicted {
            self.counters.record(CacheEvent::Evicted);
        }
        self
    }

    /// Swap the key strategy. Anything stored under the old keys is
    /// dropped; capacity, observer and counters carry over.
    pub fn with_key_strategy<T>(self, strategy: T) -> Memoized<A, R, E, T>
    where
        T: KeyStrategy<A>,
    {
        let mut store = Store::new();
        if let Some(capacity) = self.capacity() {
            store.bound(capacity);
        }
        Memoized {
            func: self.func,
            strategy,
            store: Mutex::new(store),
            counters: self.counters,
            observer: self.observer,
            _args: PhantomData,
        }
    }

    /// Install a callback that sees every hit, miss and failure.
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: Fn(CacheEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn call(&self, args: &A) -> Result<Arc<R>, MemoError<E>> {
        let key = match self.strategy.derive(args) {
            Ok(key) => key,
            Err(err) => {
                self.emit(CacheEvent::KeyFailure);
                return Err(MemoError::Key(err));
            }
        };

        let lookup = self.store.lock().lookup::<R>(&key);
        let slot = match lookup {
            Lookup::Hit(value) => {
                trace!("memo hit");
                self.emit(CacheEvent::Hit);
                return Ok(value);
            }
            Lookup::Pending(slot) => slot,
        };

        let mut computed = false;
        let outcome = slot.get_or_try_init(|| {
            computed = true;
            (self.func)(args).map(Arc::new)
        });

        match outcome {
            Ok(value) => {
                let value = Arc::clone(value);
                if computed {
                    trace!("memo miss");
                    self.emit(CacheEvent::Miss);
                    let admission = self.store.lock().admit(&key, &slot);
                    if admission.stored {
                        self.counters.record_insertion();
                    }
                    for _ in 0..admission.evicted {
                        self.emit(CacheEvent::Evicted);
                    }
                } else {
                    trace!("memo hit after waiting on in-flight computation");
                    self.emit(CacheEvent::Hit);
                }
                Ok(value)
            }
            Err(err) => {
                trace!("memo computation failed; nothing stored");
                self.store.lock().abandon(&key, &slot);
                self.emit(CacheEvent::Failure);
                Err(MemoError::Computation(err))
            }
        }
    }

    /// Whether a value is stored for `args`. Key failures read as absent.
    pub fn contains(&self, args: &A) -> bool {
        self.strategy
            .derive(args)
            .is_ok_and(|key| self.store.lock().contains::<R>(&key))
    }

    /// Drop the stored value for `args`, returning whether one existed.
    pub fn invalidate(&self, args: &A) -> Result<bool, MemoError<E>> {
        let key = self.strategy.derive(args)?;
        Ok(self.store.lock().remove::<R>(&key))
    }

    pub fn clear(&self) {
        self.store.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.store.lock().capacity()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn emit(&self, event: CacheEvent) {
        self.counters.record(event);
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

impl<A, R, E, S> fmt::Debug for Memoized<A, R, E, S>
where
    S: KeyStrategy<A>,
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
