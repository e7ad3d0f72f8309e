//! Builder for constructing ChangeWatcher instances.

use crate::core::watcher::WatchSettings;
use crate::core::{ChangeWatcher, PollErrorPolicy};
use crate::error::{Result, WatcherError};
use crate::store::{Connect, TransactionalStore};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::WatcherMetrics;

/// Default interval between polls of the watch key.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Builder for constructing a `ChangeWatcher`.
///
/// # Examples
///
/// ```rust,no_run
/// use kv_watcher::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> Result<()> {
/// let watcher = ChangeWatcher::builder()
///     .with_key("casbin_policy_rev")
///     .with_poll_interval(Duration::from_millis(200))
///     .with_address("memory://policies")
///     .with_retry(RetryPolicy::new(5))
///     .build::<MemoryStore>()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ChangeWatcherBuilder {
    key: Option<String>,
    poll_interval: Duration,
    address: Option<String>,
    policy: PollErrorPolicy,
    #[cfg(feature = "metrics")]
    metrics: Option<WatcherMetrics>,
}

impl ChangeWatcherBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            address: None,
            policy: PollErrorPolicy::FailStop,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Set the watch key shared by all publishers and watchers.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the interval between polls. Default is 1 second.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the store address passed to [`Connect::connect`].
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set how the polling task handles store errors.
    pub fn with_poll_error_policy(mut self, policy: PollErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retry failed polls with backoff instead of stopping on the first error.
    pub fn with_retry(self, retry: crate::core::RetryPolicy) -> Self {
        self.with_poll_error_policy(PollErrorPolicy::Retry(retry))
    }

    /// Record poll and publish metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: WatcherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Connect to the configured address and start the watcher.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key is missing or empty, or the poll interval is zero
    /// - No address was set
    /// - The store cannot be reached
    pub async fn build<S: Connect>(self) -> Result<ChangeWatcher> {
        let settings = self.validate()?;
        let address = self.address.as_deref().ok_or_else(|| {
            WatcherError::InvalidConfig("store address is required".to_string())
        })?;

        let store = S::connect(address).await?;
        Ok(ChangeWatcher::start(settings, Arc::new(store)))
    }

    /// Start the watcher on an already opened store. The address is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or empty, or the poll interval is zero.
    pub fn build_with_store<S>(self, store: S) -> Result<ChangeWatcher>
    where
        S: TransactionalStore + 'static,
    {
        let settings = self.validate()?;
        Ok(ChangeWatcher::start(settings, Arc::new(store)))
    }

    fn validate(&self) -> Result<WatchSettings> {
        let key = match self.key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                return Err(WatcherError::InvalidConfig(
                    "watch key must not be empty".to_string(),
                ));
            }
        };

        if self.poll_interval.is_zero() {
            return Err(WatcherError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        #[allow(unused_mut)]
        let mut settings = WatchSettings::new(key, self.poll_interval, self.policy);
        #[cfg(feature = "metrics")]
        {
            settings.metrics = self.metrics.clone();
        }
        Ok(settings)
    }
}

impl Default for ChangeWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
