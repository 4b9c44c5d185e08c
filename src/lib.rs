//! Memoized and debounced wrappers around ordinary functions.
//!
//! [`memo`] caches results per argument value, [`debounce`] collapses bursts
//! of calls into one delayed invocation, and [`timer`] supplies the clocks
//! the debouncer schedules against.

pub mod cli;
pub mod config;
pub mod debounce;
pub mod memo;
pub mod timer;
pub mod version;

pub use config::{CoalesceConfig, ConfigError};
pub use debounce::{DebounceStats, Debouncer, DeferredExecutionError};
pub use memo::{AsyncMemoized, CacheStats, MemoError, Memoized, memoize};
pub use timer::{ManualClock, ThreadTimer, Timer, TimerHandle, TokioTimer};
