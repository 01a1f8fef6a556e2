//! Connection options.

use std::time::Duration;

use anyhow::{Context, Result};
use fromenv::FromEnv;

const DEFAULT_DATABASE: &str = "file::memory:?cache=shared";
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_MAX_PARAMETERS: usize = 999;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Options used to open connections to the embedded database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Database path or URI.
    pub database: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Maximum number of parameters a single statement may bind.
    pub max_parameters: usize,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

/// Raw environment values, parsed into [`ConnectOptions`] by [`ConnectOptions::load`].
#[derive(Debug, Clone, FromEnv)]
pub struct EnvOptions {
    /// `EMBER_DATABASE`.
    #[env(from = "EMBER_DATABASE", default = "file::memory:?cache=shared")]
    pub database: String,
    /// `EMBER_POOL_SIZE`.
    #[env(from = "EMBER_POOL_SIZE", default = "4")]
    pub pool_size: String,
    /// `EMBER_MAX_PARAMETERS`.
    #[env(from = "EMBER_MAX_PARAMETERS", default = "999")]
    pub max_parameters: String,
    /// `EMBER_BUSY_TIMEOUT_MS`.
    #[env(from = "EMBER_BUSY_TIMEOUT_MS", default = "5000")]
    pub busy_timeout_ms: String,
}

impl ConnectOptions {
    /// Options for `database` with default pool size, parameter limit and busy timeout.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Loads options from `EMBER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn load() -> Result<Self> {
        let env = EnvOptions::from_env().finalize().context("issue loading connection options")?;

        let pool_size: usize = env.pool_size.parse().context("parsing EMBER_POOL_SIZE")?;
        if pool_size == 0 {
            anyhow::bail!("EMBER_POOL_SIZE must be at least 1");
        }
        let max_parameters = env.max_parameters.parse().context("parsing EMBER_MAX_PARAMETERS")?;
        let busy_timeout_ms = env.busy_timeout_ms.parse().context("parsing EMBER_BUSY_TIMEOUT_MS")?;

        Ok(Self {
            database: env.database,
            pool_size,
            max_parameters,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }

    /// Sets the pool size; values below 1 are raised to 1.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Sets the per-statement parameter limit.
    #[must_use]
    pub const fn max_parameters(mut self, limit: usize) -> Self {
        self.max_parameters = limit;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            max_parameters: DEFAULT_MAX_PARAMETERS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}
