//! Watcher settings loaded from files and environment variables.

use crate::core::{ChangeWatcherBuilder, RetryConfig};
use crate::error::{Result, WatcherError};
use config::{Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Process bootstrap settings for a [`ChangeWatcher`](crate::core::ChangeWatcher).
///
/// Loaded with the `config` crate from an optional file (YAML, TOML or JSON,
/// detected from the extension) overlaid with environment variables.
///
/// | Field | Environment variable (prefix `KVW`) |
/// |---|---|
/// | `key` | `KVW_KEY` |
/// | `address` | `KVW_ADDRESS` |
/// | `poll_interval_ms` | `KVW_POLL_INTERVAL_MS` |
/// | `retry.max_retries` | `KVW_RETRY__MAX_RETRIES` |
///
/// # Examples
///
/// ```rust,no_run
/// use kv_watcher::prelude::*;
/// use std::path::Path;
///
/// # async fn example() -> Result<()> {
/// let settings = WatcherConfig::load(Some(Path::new("watcher.toml")), "KVW")?;
/// let watcher = settings.into_builder().build::<MemoryStore>().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatcherConfig {
    /// Watch key shared by every process.
    pub key: String,
    /// Store address (`memory://<name>`, or PD endpoints for TiKV).
    pub address: String,
    /// Interval between polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Retry poll errors instead of stopping on the first one.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl WatcherConfig {
    /// Load settings from an optional file, then environment variables
    /// starting with `env_prefix`. Environment variables take precedence.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::ConfigLoad`] if the file cannot be read or a
    /// required field is missing.
    pub fn load(file: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        let env_source = Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);

        let settings = builder.add_source(env_source).build()?;
        settings
            .try_deserialize::<Self>()
            .map_err(|e| WatcherError::ConfigLoad(format!("Failed to deserialize settings: {}", e)))
    }

    /// The poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Turn these settings into a builder ready to `build`.
    pub fn into_builder(self) -> ChangeWatcherBuilder {
        let poll_interval = self.poll_interval();
        let builder = ChangeWatcherBuilder::new()
            .with_key(self.key)
            .with_address(self.address)
            .with_poll_interval(poll_interval);

        match self.retry {
            Some(retry) => builder.with_retry(retry.into()),
            None => builder,
        }
    }
}
