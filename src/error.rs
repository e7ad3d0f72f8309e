//! Error types for kv-watcher.

/// Result type alias for kv-watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur when publishing or watching changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatcherError {
    /// The shared store could not be reached, either while connecting or
    /// while starting a transaction.
    #[error("Failed to connect to store: {0}")]
    Connection(String),

    /// A read or write inside a transaction failed.
    #[error("Store operation failed: {0}")]
    Store(String),

    /// The watch key holds a value that is not a valid revision.
    #[error("Failed to decode revision {value:?}: {reason}")]
    Decode {
        /// The raw value found at the watch key, rendered as text
        value: String,
        /// Why it could not be decoded
        reason: String,
    },

    /// The store rejected the transaction commit.
    #[error("Transaction commit failed: {0}")]
    Commit(String),

    /// Watcher parameters are invalid (empty key, zero interval, ...).
    #[error("Invalid watcher configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load a `WatcherConfig` from its sources.
    #[error("Failed to load watcher configuration: {0}")]
    ConfigLoad(String),
}

impl WatcherError {
    /// Create a decode error for the given raw value.
    pub fn decode(value: &[u8], reason: impl Into<String>) -> Self {
        Self::Decode {
            value: String::from_utf8_lossy(value).into_owned(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the store being unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<config::ConfigError> for WatcherError {
    fn from(err: config::ConfigError) -> Self {
        WatcherError::ConfigLoad(err.to_string())
    }
}
