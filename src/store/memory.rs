//! In-process transactional store.

use super::{Connect, Transaction, TransactionalStore};
use crate::error::{Result, WatcherError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

const ADDRESS_SCHEME: &str = "memory://";

/// Named stores shared by every `connect` call in the process.
static REGISTRY: OnceLock<Mutex<HashMap<String, MemoryStore>>> = OnceLock::new();

struct Versioned {
    value: Vec<u8>,
    version: u64,
}

struct Inner {
    data: HashMap<Vec<u8>, Versioned>,
    /// Version of the most recent commit.
    version: u64,
    unavailable: bool,
    failing_commits: usize,
}

/// In-memory transactional store with snapshot reads and optimistic commits.
///
/// Clones share the same data. Stores opened through [`Connect::connect`] with
/// the same `memory://<name>` address are shared across the whole process, so
/// several watchers in one process behave like watchers in separate processes
/// pointed at one real store.
///
/// A commit is rejected when another transaction committed a write to one of
/// the same keys after this transaction began.
///
/// # Examples
///
/// ```rust
/// use kv_watcher::store::{MemoryStore, TransactionalStore};
///
/// # async fn example() -> kv_watcher::error::Result<()> {
/// let store = MemoryStore::new();
/// let mut txn = store.begin().await?;
/// txn.set(b"policy_rev", b"1".to_vec()).await?;
/// txn.commit().await?;
///
/// assert_eq!(store.get(b"policy_rev"), Some(b"1".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new, empty, unnamed store.
    pub fn new() -> Self {
        Self::with_name("anonymous")
    }

    fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner {
                data: HashMap::new(),
                version: 0,
                unavailable: false,
                failing_commits: 0,
            })),
        }
    }

    /// Get the process-wide store registered under `name`, creating it if needed.
    pub fn named(name: &str) -> Self {
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        registry
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Self::with_name(name))
            .clone()
    }

    /// Read the committed value of `key` outside any transaction.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().data.get(key).map(|v| v.value.clone())
    }

    /// Write `key` directly, as if by a single-write committed transaction.
    pub fn insert(&self, key: &[u8], value: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock();
        inner.version += 1;
        let version = inner.version;
        inner.data.insert(
            key.to_vec(),
            Versioned {
                value: value.into(),
                version,
            },
        );
    }

    /// Delete `key` directly.
    pub fn remove(&self, key: &[u8]) {
        self.inner.lock().data.remove(key);
    }

    /// Simulate the store becoming unreachable (or reachable again).
    ///
    /// While unavailable, beginning a transaction and reading inside one fail
    /// with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Reject the next `count` commits that carry writes.
    pub fn fail_next_commits(&self, count: usize) {
        self.inner.lock().failing_commits = count;
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.lock().unavailable {
            return Err(WatcherError::Connection(format!(
                "memory store '{}' is unavailable",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(WatcherError::Connection(format!(
                "memory store '{}' is unavailable",
                self.name
            )));
        }

        let snapshot = inner
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();

        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            start_version: inner.version,
            snapshot,
            writes: HashMap::new(),
        }))
    }

    fn name(&self) -> String {
        format!("{}{}", ADDRESS_SCHEME, self.name)
    }
}

#[async_trait]
impl Connect for MemoryStore {
    async fn connect(address: &str) -> Result<Self> {
        let name = address.strip_prefix(ADDRESS_SCHEME).ok_or_else(|| {
            WatcherError::Connection(format!(
                "Unsupported address '{}': expected {}<name>",
                address, ADDRESS_SCHEME
            ))
        })?;

        if name.is_empty() {
            return Err(WatcherError::Connection(format!(
                "Memory store address '{}' has no name",
                address
            )));
        }

        Ok(Self::named(name))
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    start_version: u64,
    snapshot: HashMap<Vec<u8>, Vec<u8>>,
    writes: HashMap<Vec<u8>, Vec<u8>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.store.check_available()?;
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        Ok(self.snapshot.get(key).cloned())
    }

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.writes.insert(key.to_vec(), value);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            store,
            start_version,
            writes,
            ..
        } = *self;

        if writes.is_empty() {
            return Ok(());
        }

        let mut inner = store.inner.lock();
        if inner.unavailable {
            return Err(WatcherError::Commit(format!(
                "memory store '{}' is unavailable",
                store.name
            )));
        }

        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            return Err(WatcherError::Commit("commit rejected".to_string()));
        }

        if let Some(key) = writes.keys().find(|key| {
            inner
                .data
                .get(*key)
                .is_some_and(|v| v.version > start_version)
        }) {
            return Err(WatcherError::Commit(format!(
                "write conflict on key {:?}",
                String::from_utf8_lossy(key)
            )));
        }

        inner.version += 1;
        let version = inner.version;
        for (key, value) in writes {
            inner.data.insert(key, Versioned { value, version });
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
