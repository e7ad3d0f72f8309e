//! Error handling policy for the polling task.

use serde::Deserialize;
use std::time::Duration;

/// What the polling task does when a store read fails.
///
/// A missing watch key is never an error. Any other failure while beginning a
/// transaction or reading the key is handled by this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollErrorPolicy {
    /// Log the error and stop polling for good. The watcher can still publish,
    /// but will never notify again.
    #[default]
    FailStop,

    /// Retry with exponential backoff, then fail-stop once retries run out.
    Retry(RetryPolicy),
}

/// Bounded exponential backoff for poll errors.
///
/// # Examples
///
/// ```rust
/// use kv_watcher::core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3)
///     .with_initial_backoff(Duration::from_millis(100))
///     .with_max_backoff(Duration::from_secs(1));
///
/// assert_eq!(policy.backoff(0), Duration::from_millis(100));
/// assert_eq!(policy.backoff(1), Duration::from_millis(200));
/// assert_eq!(policy.backoff(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the delay between retries.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy with `max_retries` and default backoff (100ms, capped at 10s).
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }

    /// Set the delay before the first retry.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the upper bound for the delay between retries.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Serializable form of [`RetryPolicy`] used by `WatcherConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay between retries, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        RetryPolicy::new(cfg.max_retries)
            .with_initial_backoff(Duration::from_millis(cfg.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(cfg.max_backoff_ms))
    }
}
