//! Debounced invocation.
//!
//! A [`Debouncer`] wraps a function so that calls arriving closer together
//! than its delay collapse into a single invocation carrying the last call's
//! arguments. Timing comes from an injected [`Timer`](crate::timer::Timer).

mod debouncer;
mod error;
mod metrics;

pub use debouncer::{Debouncer, DeferredFn, ErrorHandler};
pub use error::{BoxError, DeferredExecutionError};
pub use metrics::DebounceStats;
