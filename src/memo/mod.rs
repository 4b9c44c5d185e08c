//! Result memoization.
//!
//! [`Memoized`] wraps a synchronous function and [`AsyncMemoized`] wraps one
//! returning a future. Both own a private store keyed through a
//! [`KeyStrategy`], never store failures, and optionally bound themselves
//! with LRU eviction.

mod async_cache;
mod cache;
pub mod eviction;
mod finite;
pub mod key;
mod stats;
mod store;

pub use async_cache::{AsyncMemoized, BoxFuture};
pub use cache::{ComputeFn, Memoized, memoize};
pub use eviction::{EvictionPolicy, LruEvictionPolicy, Unbounded};
pub use key::{CacheKey, FnKey, JsonKey, KeyError, KeyStrategy, ValueKey};
pub use stats::{CacheEvent, CacheStats};

use std::sync::Arc;

use thiserror::Error;

/// Callback notified of every [`CacheEvent`].
pub type CacheObserver = Arc<dyn Fn(CacheEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum MemoError<E> {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("memoized computation failed: {0}")]
    Computation(E),
}

impl<E> MemoError<E> {
    /// The wrapped function's own error, if that is what failed.
    pub fn into_computation(self) -> Option<E> {
        match self {
            Self::Computation(err) => Some(err),
            Self::Key(_) => None,
        }
    }

    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::Key(_))
    }
}
