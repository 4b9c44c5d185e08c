pub mod logger;
pub mod panic;

pub use logger::{LogLevel, init_logging};
pub use panic::panic_message;
