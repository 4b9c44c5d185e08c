use tracing_subscriber::EnvFilter;

/// Environment variable consulted for a full `EnvFilter` directive.
pub const LOG_ENV_VAR: &str = "COALESCE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Maps a repeated `-v` count onto a level.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }

    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Installs the global fmt subscriber.
///
/// `COALESCE_LOG` wins over `level` when it is set and parses. Returns `false`
/// when a subscriber was already installed, which is harmless in tests that
/// initialise logging more than once.
pub fn init_logging(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
