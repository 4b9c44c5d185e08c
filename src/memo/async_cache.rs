use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::trace;

use super::key::{KeyStrategy, ValueKey};
use super::stats::{CacheCounters, CacheEvent, CacheStats};
use super::store::{Lookup, Store};
use super::{CacheObserver, MemoError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type AsyncComputeFn<A, R, E> = Box<dyn Fn(A) -> BoxFuture<Result<R, E>> + Send + Sync>;

type AsyncSlot<R> = OnceCell<Arc<R>>;

/// Memoizer for functions that return a future.
///
/// The in-flight operation is what gets shared: every caller awaiting the
/// same key while it is being computed receives the one result, and only a
/// successful resolution is stored. If the computing caller fails or is
/// dropped mid-flight, the next waiter runs the function itself.
pub struct AsyncMemoized<A, R, E, S = ValueKey>
where
    S: KeyStrategy<A>,
{
    func: AsyncComputeFn<A, R, E>,
    strategy: S,
    store: Mutex<Store<S::Key, AsyncSlot<R>>>,
    counters: CacheCounters,
    observer: Option<CacheObserver>,
    _args: PhantomData<fn(A)>,
}

impl<A, R, E> AsyncMemoized<A, R, E, ValueKey>
where
    ValueKey: KeyStrategy<A>,
    R: Send + Sync + 'static,
{
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self::with_strategy(ValueKey, func)
    }
}

impl<A, R, E, S> AsyncMemoized<A, R, E, S>
where
    S: KeyStrategy<A>,
    R: Send + Sync + 'static,
{
    pub fn with_strategy<F, Fut>(strategy: S, func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self {
            func: Box::new(move |args: A| -> BoxFuture<Result<R, E>> { Box::pin(func(args)) }),
            strategy,
            store: Mutex::new(Store::new()),
            counters: CacheCounters::default(),
            observer: None,
            _args: PhantomData,
        }
    }

    pub fn with_capacity(self, capacity: usize) -> Self {
        let evicted = self.store.lock().bound(capacity);
        for _ in 0..evicted {
            self.counters.record(CacheEvent::Evicted);
        }
        self
    }

    /// Swap the key strategy. Anything stored under the old keys is
    /// dropped; capacity, observer and counters carry over.
    pub fn with_key_strategy<T>(self, strategy: T) -> AsyncMemoized<A, R, E, T>
    where
        T: KeyStrategy<A>,
    {
        let mut store = Store::new();
        if let Some(capacity) = self.capacity() {
            store.bound(capacity);
        }
        AsyncMemoized {
            func: self.func,
            strategy,
            store: Mutex::new(store),
            counters: self.counters,
            observer: self.observer,
            _args: PhantomData,
        }
    }

    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: Fn(CacheEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub async fn call(&self, args: A) -> Result<Arc<R>, MemoError<E>> {
        let key = match self.strategy.derive(&args) {
            Ok(key) => key,
            Err(err) => {
                self.emit(CacheEvent::KeyFailure);
                return Err(MemoError::Key(err));
            }
        };

        let lookup = self.store.lock().lookup::<R>(&key);
        let slot = match lookup {
            Lookup::Hit(value) => {
                trace!("async memo hit");
                self.emit(CacheEvent::Hit);
                return Ok(value);
            }
            Lookup::Pending(slot) => slot,
        };

        let computed = AtomicBool::new(false);
        let outcome = slot
            .get_or_try_init(|| {
                computed.store(true, Ordering::Relaxed);
                let pending = (self.func)(args);
                async move { pending.await.map(Arc::new) }
            })
            .await;

        match outcome {
            Ok(value) => {
                let value = Arc::clone(value);
                if computed.load(Ordering::Relaxed) {
                    trace!("async memo miss");
                    self.emit(CacheEvent::Miss);
                    let admission = self.store.lock().admit(&key, &slot);
                    if admission.stored {
                        self.counters.record_insertion();
                    }
                    for _ in 0..admission.evicted {
                        self.emit(CacheEvent::Evicted);
                    }
                } else {
                    trace!("async memo joined an in-flight computation");
                    self.emit(CacheEvent::Hit);
                }
                Ok(value)
            }
            Err(err) => {
                self.store.lock().abandon(&key, &slot);
                self.emit(CacheEvent::Failure);
                Err(MemoError::Computation(err))
            }
        }
    }

    pub fn contains(&self, args: &A) -> bool {
        self.strategy
            .derive(args)
            .is_ok_and(|key| self.store.lock().contains::<R>(&key))
    }

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

impl<A, R, E, S> fmt::Debug for AsyncMemoized<A, R, E, S>
where
    S: KeyStrategy<A>,
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMemoized")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
