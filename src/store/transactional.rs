//! Transactional store traits.

use crate::error::Result;
use async_trait::async_trait;

/// A shared key-value store with begin/commit transaction semantics.
///
/// Implement this trait to back a [`ChangeWatcher`](crate::core::ChangeWatcher)
/// with a custom store. Writes made inside a transaction must become visible to
/// other transactions only after a successful commit, and reads inside one
/// transaction must observe a consistent snapshot.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Connection`](crate::error::WatcherError::Connection)
    /// if the store cannot be reached.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Get a human-readable name for this store (for logging/debugging).
    fn name(&self) -> String;
}

/// A single transaction against a [`TransactionalStore`].
#[async_trait]
pub trait Transaction: Send {
    /// Read a key. `Ok(None)` means the key does not exist, which is distinct
    /// from a read failure.
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffer a write of `value` under `key`.
    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Commit all buffered writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all buffered writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A store that can be opened from a connection string.
#[async_trait]
pub trait Connect: TransactionalStore + Sized + 'static {
    /// Open a connection to the store at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Connection`](crate::error::WatcherError::Connection)
    /// if the address is malformed or the store is unreachable.
    async fn connect(address: &str) -> Result<Self>;
}
