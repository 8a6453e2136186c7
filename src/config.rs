//! Configuration parsed from environment variables.
//!
//! Required:
//! - `DATABASE_URL`
//!
//! Optional:
//! - `DB_MAX_CONNECTIONS`: default 5
//! - `FAVORITES_WATCH_BUFFER`: live-query channel capacity, default 16
//! - `FAVORITES_WATCH_RETRY_MS`: back-off after a listener error, default 500

use std::time::Duration;

pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_WATCH_BUFFER: usize = 16;
pub const DEFAULT_WATCH_RETRY_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(&'static str),
}

impl crate::error::ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingVar(_) => "E_CONFIG_MISSING",
        }
    }
}

/// Tuning for live queries against the Postgres store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Bounded channel capacity between a watch task and its consumer.
    pub buffer: usize,
    /// Delay before the change feed reconnects after a listener failure.
    pub retry: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { buffer: DEFAULT_WATCH_BUFFER, retry: Duration::from_millis(DEFAULT_WATCH_RETRY_MS) }
    }
}

impl WatchConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            buffer: env_parse("FAVORITES_WATCH_BUFFER", DEFAULT_WATCH_BUFFER).max(1),
            retry: Duration::from_millis(env_parse("FAVORITES_WATCH_RETRY_MS", DEFAULT_WATCH_RETRY_MS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub watch: WatchConfig,
}

impl Config {
    /// Build typed config from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] if `DATABASE_URL` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?;
        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            watch: WatchConfig::from_env(),
        })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
