//! Settings shared by the `coalesce` binary and embedders that want
//! file/environment driven defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CAPACITY_ENV_VAR: &str = "COALESCE_CACHE_CAPACITY";
pub const DELAY_ENV_VAR: &str = "COALESCE_DELAY_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "toml-config")]
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config files need the `toml-config` feature ({})", path.display())]
    Unsupported { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    /// LRU bound on stored results; `None` keeps every result.
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub delay_ms: u64,
}

impl DebounceConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { delay_ms: 200 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    pub memo: MemoConfig,
    pub debounce: DebounceConfig,
}

impl CoalesceConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|var| std::env::var(var).ok())
    }

    /// Apply `COALESCE_*` overrides fetched through `lookup`.
    ///
    /// `COALESCE_CACHE_CAPACITY` accepts a count or `unbounded`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(CAPACITY_ENV_VAR) {
            let value = raw.trim();
            self.memo.capacity = if value.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(value.parse().map_err(|err: std::num::ParseIntError| {
                    ConfigError::InvalidEnv {
                        var: CAPACITY_ENV_VAR,
                        value: raw.clone(),
                        reason: err.to_string(),
                    }
                })?)
            };
        }

        if let Some(raw) = lookup(DELAY_ENV_VAR) {
            self.debounce.delay_ms =
                raw.trim()
                    .parse()
                    .map_err(|err: std::num::ParseIntError| ConfigError::InvalidEnv {
                        var: DELAY_ENV_VAR,
                        value: raw.clone(),
                        reason: err.to_string(),
                    })?;
        }

        Ok(self)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_file(path, &source)
    }

    #[cfg(feature = "toml-config")]
    fn parse_file(_path: &Path, source: &str) -> Result<Self, ConfigError> {
        Self::from_toml_str(source)
    }

    #[cfg(not(feature = "toml-config"))]
    fn parse_file(path: &Path, _source: &str) -> Result<Self, ConfigError> {
        Err(ConfigError::Unsupported {
            path: path.to_path_buf(),
        })
    }
}
