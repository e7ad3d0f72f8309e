//! TiKV-backed transactional store.

use super::{Connect, Transaction, TransactionalStore};
use crate::error::{Result, WatcherError};
use async_trait::async_trait;
use tikv_client::{CheckLevel, TransactionClient, TransactionOptions};

const ADDRESS_SCHEME: &str = "tikv://";

/// Transactional store backed by a TiKV cluster.
///
/// Uses optimistic transactions. A concurrent writer to the watch key makes the
/// later commit fail, which surfaces as a commit error from `publish`.
///
/// # Examples
///
/// ```rust,no_run
/// use kv_watcher::store::{Connect, TikvStore};
///
/// # async fn example() -> kv_watcher::error::Result<()> {
/// let store = TikvStore::connect("tikv://127.0.0.1:2379").await?;
/// # Ok(())
/// # }
/// ```
pub struct TikvStore {
    client: TransactionClient,
    endpoints: Vec<String>,
}

impl TikvStore {
    /// Parse a comma-separated PD endpoint list, with an optional `tikv://` prefix.
    fn parse_endpoints(address: &str) -> Result<Vec<String>> {
        let list = address.strip_prefix(ADDRESS_SCHEME).unwrap_or(address);
        let endpoints: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if endpoints.is_empty() {
            return Err(WatcherError::Connection(format!(
                "No PD endpoints in address '{}'",
                address
            )));
        }
        Ok(endpoints)
    }

    /// Get the PD endpoints this store is connected to.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

#[async_trait]
impl Connect for TikvStore {
    async fn connect(address: &str) -> Result<Self> {
        let endpoints = Self::parse_endpoints(address)?;
        let client = TransactionClient::new(endpoints.clone())
            .await
            .map_err(|e| WatcherError::Connection(format!("TiKV connect failed: {}", e)))?;

        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl TransactionalStore for TikvStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let options = TransactionOptions::new_optimistic().drop_check(CheckLevel::Warn);
        let txn = self
            .client
            .begin_with_options(options)
            .await
            .map_err(|e| WatcherError::Connection(format!("TiKV begin failed: {}", e)))?;

        Ok(Box::new(TikvTransaction { txn }))
    }

    fn name(&self) -> String {
        format!("{}{}", ADDRESS_SCHEME, self.endpoints.join(","))
    }
}

struct TikvTransaction {
    txn: tikv_client::Transaction,
}

#[async_trait]
impl Transaction for TikvTransaction {
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.txn
            .get(key.to_vec())
            .await
            .map_err(|e| WatcherError::Store(format!("TiKV get failed: {}", e)))
    }

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.txn
            .put(key.to_vec(), value)
            .await
            .map_err(|e| WatcherError::Store(format!("TiKV put failed: {}", e)))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut txn = self.txn;
        txn.commit()
            .await
            .map(|_| ())
            .map_err(|e| WatcherError::Commit(format!("TiKV commit failed: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut txn = self.txn;
        txn.rollback()
            .await
            .map_err(|e| WatcherError::Store(format!("TiKV rollback failed: {}", e)))
    }
}
