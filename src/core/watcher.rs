//! The change watcher: publishes revisions and polls for peers' revisions.

use crate::core::revision;
use crate::core::{ChangeWatcherBuilder, PollErrorPolicy};
use crate::error::Result;
use crate::store::{Connect, Transaction, TransactionalStore};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use crate::metrics::WatcherMetrics;

/// Callback invoked with the newly observed watch-key value.
pub type Callback = Arc<dyn Fn(String) + Send + Sync>;

/// State guarded by the instance lock. Never held across store I/O or while
/// the callback runs.
struct State {
    last_observed: Vec<u8>,
    callback: Option<Callback>,
    stopped: bool,
}

/// Validated parameters a watcher is started with.
pub(crate) struct WatchSettings {
    pub(crate) key: String,
    pub(crate) poll_interval: Duration,
    pub(crate) policy: PollErrorPolicy,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<WatcherMetrics>,
}

impl WatchSettings {
    pub(crate) fn new(key: String, poll_interval: Duration, policy: PollErrorPolicy) -> Self {
        Self {
            key,
            poll_interval,
            policy,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}

struct Shared {
    key: String,
    poll_interval: Duration,
    store: Arc<dyn TransactionalStore>,
    policy: PollErrorPolicy,
    state: Mutex<State>,
    /// Serialises a publish commit with a poll tick's read-and-compare, so a
    /// tick never observes our own commit before `last_observed` records it.
    commit_gate: tokio::sync::Mutex<()>,
    #[cfg(feature = "metrics")]
    metrics: Option<WatcherMetrics>,
}

/// Cross-process change notifier over a shared transactional store.
///
/// Every process that keeps a local copy of shared state (an access-control
/// policy, for instance) runs one `ChangeWatcher` on the same watch key. After
/// changing the shared state, a process calls [`publish`](Self::publish), which
/// increments the revision stored at the watch key. Each watcher polls the key
/// every `poll_interval` and invokes its callback when the value differs from
/// the last one it saw. The publisher records its own revision, so it does not
/// notify itself.
///
/// Dropping the watcher closes it.
///
/// # Examples
///
/// ```rust,no_run
/// use kv_watcher::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> kv_watcher::error::Result<()> {
/// let watcher = ChangeWatcher::connect::<MemoryStore>(
///     "casbin_policy_rev",
///     Duration::from_millis(500),
///     "memory://policies",
/// )
/// .await?;
///
/// watcher.set_callback(|rev| println!("policy changed, now at revision {rev}"));
///
/// // After saving policy changes elsewhere:
/// let revision = watcher.publish().await?;
/// println!("published revision {revision}");
///
/// watcher.close();
/// # Ok(())
/// # }
/// ```
pub struct ChangeWatcher {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Create a new builder for constructing a watcher.
    pub fn builder() -> ChangeWatcherBuilder {
        ChangeWatcherBuilder::new()
    }

    /// Connect to the store at `address` and start watching `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, the interval is zero, or the store
    /// cannot be reached. No polling task is started in that case.
    pub async fn connect<S: Connect>(
        key: impl Into<String>,
        poll_interval: Duration,
        address: &str,
    ) -> Result<Self> {
        ChangeWatcherBuilder::new()
            .with_key(key)
            .with_poll_interval(poll_interval)
            .with_address(address)
            .build::<S>()
            .await
    }

    /// Start the polling task. Must be called inside a tokio runtime.
    pub(crate) fn start(settings: WatchSettings, store: Arc<dyn TransactionalStore>) -> Self {
        let shared = Arc::new(Shared {
            key: settings.key,
            poll_interval: settings.poll_interval,
            store,
            policy: settings.policy,
            state: Mutex::new(State {
                last_observed: Vec::new(),
                callback: None,
                stopped: false,
            }),
            commit_gate: tokio::sync::Mutex::new(()),
            #[cfg(feature = "metrics")]
            metrics: settings.metrics,
        });

        let task = tokio::spawn(poll(Arc::clone(&shared)));
        Self { shared, task }
    }

    /// Set the function called when a change is detected, replacing any
    /// previous one.
    ///
    /// Takes effect from the next detected change. The callback runs on the
    /// polling task; a slow callback delays the following polls.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.shared.state.lock().callback = Some(Arc::new(callback));
    }

    /// Remove the callback. Changes are still tracked, but nothing is invoked.
    pub fn clear_callback(&self) {
        self.shared.state.lock().callback = None;
    }

    /// Signal peers that shared state changed by incrementing the revision at
    /// the watch key.
    ///
    /// Returns the revision written. This watcher records the revision as
    /// already observed, so its own callback does not fire for it.
    ///
    /// # Errors
    ///
    /// Returns a connection, store, decode or commit error. The watch key is
    /// left unchanged on any failure.
    pub async fn publish(&self) -> Result<u64> {
        let result = self.shared.publish().await;
        self.shared.record_publish(result.is_ok());
        result
    }

    /// Stop notifying. Idempotent.
    ///
    /// The polling task exits at its next wake-up, at most one poll interval
    /// later. A tick that already passed its change check may still deliver
    /// its notification; no later tick will.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.stopped {
            state.stopped = true;
            tracing::debug!(key = %self.shared.key, "watcher close requested");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Whether the polling task is still running.
    ///
    /// Turns false once the task has exited, either after a close or after a
    /// store error it could not recover from.
    pub fn is_polling(&self) -> bool {
        !self.task.is_finished()
    }

    /// The watch key.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// The interval between polls.
    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    /// The value this watcher last saw at the watch key (empty if none yet).
    pub fn last_observed(&self) -> Vec<u8> {
        self.shared.state.lock().last_observed.clone()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("key", &self.shared.key)
            .field("poll_interval", &self.shared.poll_interval)
            .field("store", &self.shared.store.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shared {
    async fn publish(&self) -> Result<u64> {
        let mut txn = self.store.begin().await?;

        let revision = match stage_next_revision(&mut *txn, self.key.as_bytes()).await {
            Ok(revision) => revision,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::debug!(error = %rollback_err, "rollback after failed publish failed");
                }
                return Err(err);
            }
        };

        let _gate = self.commit_gate.lock().await;
        txn.commit().await?;
        self.state.lock().last_observed = revision::encode(revision);

        tracing::debug!(key = %self.key, revision, "published revision");
        Ok(revision)
    }

    /// Read the watch key in its own transaction. A missing key reads as empty.
    async fn read_key(&self) -> Result<Vec<u8>> {
        let mut txn = self.store.begin().await?;

        let value = match txn.get(self.key.as_bytes()).await {
            Ok(value) => value,
            Err(err) => {
                let _ = txn.rollback().await;
                return Err(err);
            }
        };

        if let Err(err) = txn.commit().await {
            tracing::debug!(error = %err, "ignoring failed commit of read-only transaction");
        }

        Ok(value.unwrap_or_default())
    }

    /// One poll tick: read, compare, and notify if the value changed.
    async fn tick(&self) -> Result<()> {
        let (observed, callback) = {
            let _gate = self.commit_gate.lock().await;
            let observed = self.read_key().await?;

            let mut state = self.state.lock();
            if state.stopped || state.last_observed == observed {
                return Ok(());
            }
            state.last_observed = observed.clone();
            (observed, state.callback.clone())
        };

        let value = String::from_utf8_lossy(&observed).into_owned();
        tracing::debug!(key = %self.key, value = %value, "watch key changed");
        self.record_change();

        if let Some(callback) = callback {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
                tracing::warn!(
                    key = %self.key,
                    "watcher callback panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }

        Ok(())
    }

    fn record_tick(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_tick();
        }
    }

    fn record_change(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_change();
        }
    }

    fn record_poll_error(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_poll_error();
        }
    }

    fn record_publish(&self, _success: bool) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(_success);
        }
    }
}

/// Read the current revision and stage the next one, without committing.
async fn stage_next_revision(txn: &mut dyn Transaction, key: &[u8]) -> Result<u64> {
    let current = txn.get(key).await?;
    let next = revision::next(current.as_deref())?;
    txn.set(key, revision::encode(next)).await?;
    Ok(next)
}

/// The polling task. Runs until the watcher is closed or a store error is not
/// recoverable under the configured policy.
async fn poll(shared: Arc<Shared>) {
    tracing::info!(
        key = %shared.key,
        store = %shared.store.name(),
        interval = ?shared.poll_interval,
        "watcher polling started"
    );

    let mut failures: u32 = 0;
    loop {
        let delay = match shared.policy {
            PollErrorPolicy::Retry(retry) if failures > 0 => retry.backoff(failures - 1),
            _ => shared.poll_interval,
        };
        tokio::time::sleep(delay).await;

        if shared.state.lock().stopped {
            tracing::info!(key = %shared.key, "watcher polling stopped");
            return;
        }

        shared.record_tick();
        let err = match shared.tick().await {
            Ok(()) => {
                failures = 0;
                continue;
            }
            Err(err) => err,
        };

        shared.record_poll_error();
        match shared.policy {
            PollErrorPolicy::Retry(retry) if failures < retry.max_retries => {
                failures += 1;
                tracing::warn!(
                    key = %shared.key,
                    attempt = failures,
                    max_retries = retry.max_retries,
                    error = %err,
                    "watcher poll failed, retrying"
                );
            }
            _ => {
                tracing::error!(
                    key = %shared.key,
                    error = %err,
                    "watcher polling task exited due to error"
                );
                return;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::error::WatcherError;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "policy_rev";
    const INTERVAL: Duration = Duration::from_millis(100);

    fn start(store: &MemoryStore) -> ChangeWatcher {
        start_with_policy(store, PollErrorPolicy::FailStop)
    }

    fn start_with_policy(store: &MemoryStore, policy: PollErrorPolicy) -> ChangeWatcher {
        ChangeWatcher::start(
            WatchSettings::new(KEY.to_string(), INTERVAL, policy),
            Arc::new(store.clone()),
        )
    }

    fn recorder(watcher: &ChangeWatcher) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        watcher.set_callback(move |value| seen_clone.lock().push(value));
        seen
    }

    async fn ticks(n: u32) {
        tokio::time::sleep(INTERVAL * n + INTERVAL / 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_from_absent_key() {
        let store = MemoryStore::new();
        let watcher = start(&store);

        assert_eq!(watcher.publish().await.unwrap(), 1);
        assert_eq!(store.get(KEY.as_bytes()), Some(b"1".to_vec()));
        assert_eq!(watcher.last_observed(), b"1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_self_notification() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        let seen = recorder(&watcher);

        watcher.publish().await.unwrap();
        ticks(3).await;

        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_change_fires_once() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        let seen = recorder(&watcher);

        store.insert(KEY.as_bytes(), "7");
        ticks(3).await;

        assert_eq!(*seen.lock(), vec!["7".to_string()]);
        assert_eq!(watcher.last_observed(), b"7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_key_reported_as_empty() {
        let store = MemoryStore::new();
        store.insert(KEY.as_bytes(), "3");
        let watcher = start(&store);
        let seen = recorder(&watcher);

        ticks(1).await;
        store.remove(KEY.as_bytes());
        ticks(1).await;

        assert_eq!(*seen.lock(), vec!["3".to_string(), String::new()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_leaves_key() {
        let store = MemoryStore::new();
        store.insert(KEY.as_bytes(), "not-a-number");
        let watcher = start(&store);

        let result = watcher.publish().await;
        assert!(matches!(result, Err(WatcherError::Decode { .. })));
        assert_eq!(store.get(KEY.as_bytes()), Some(b"not-a-number".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_keeps_last_observed() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        store.fail_next_commits(1);

        let result = watcher.publish().await;
        assert!(matches!(result, Err(WatcherError::Commit(_))));
        assert_eq!(store.get(KEY.as_bytes()), None);
        assert!(watcher.last_observed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_callback_replaces_previous() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        let first = recorder(&watcher);
        let second = recorder(&watcher);

        store.insert(KEY.as_bytes(), "1");
        ticks(1).await;

        assert!(first.lock().is_empty());
        assert_eq!(*second.lock(), vec!["1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_without_callback_is_consumed() {
        let store = MemoryStore::new();
        let watcher = start(&store);

        store.insert(KEY.as_bytes(), "1");
        ticks(1).await;

        // Registering later does not replay the change already observed
        let seen = recorder(&watcher);
        ticks(2).await;
        assert!(seen.lock().is_empty());
        assert_eq!(watcher.last_observed(), b"1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_reenter_watcher() {
        let store = MemoryStore::new();
        let watcher = Arc::new(start(&store));
        let calls = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&watcher);
        let calls_clone = Arc::clone(&calls);
        watcher.set_callback(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(w) = weak.upgrade() {
                w.clear_callback();
            }
        });

        store.insert(KEY.as_bytes(), "1");
        ticks(1).await;
        store.insert(KEY.as_bytes(), "2");
        ticks(1).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_does_not_kill_task() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        watcher.set_callback(|_| panic!("boom"));

        store.insert(KEY.as_bytes(), "1");
        ticks(1).await;
        assert!(watcher.is_polling());

        let seen = recorder(&watcher);
        store.insert(KEY.as_bytes(), "2");
        ticks(1).await;
        assert_eq!(*seen.lock(), vec!["2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_stops_task() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        let seen = recorder(&watcher);

        watcher.close();
        watcher.close();
        assert!(watcher.is_closed());

        store.insert(KEY.as_bytes(), "1");
        ticks(2).await;

        assert!(seen.lock().is_empty());
        assert!(!watcher.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_stop_on_store_error() {
        let store = MemoryStore::new();
        let watcher = start(&store);
        let seen = recorder(&watcher);

        store.set_unavailable(true);
        ticks(1).await;
        assert!(!watcher.is_polling());

        store.set_unavailable(false);
        store.insert(KEY.as_bytes(), "1");
        ticks(2).await;
        assert!(seen.lock().is_empty());

        // Publishing still works after the poll task died
        assert_eq!(watcher.publish().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_recovers() {
        let store = MemoryStore::new();
        let policy = PollErrorPolicy::Retry(
            RetryPolicy::new(3).with_initial_backoff(Duration::from_millis(50)),
        );
        let watcher = start_with_policy(&store, policy);
        let seen = recorder(&watcher);

        store.set_unavailable(true);
        ticks(1).await;
        assert!(watcher.is_polling());

        store.set_unavailable(false);
        store.insert(KEY.as_bytes(), "1");
        ticks(2).await;

        assert!(watcher.is_polling());
        assert_eq!(*seen.lock(), vec!["1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_gives_up() {
        let store = MemoryStore::new();
        let policy = PollErrorPolicy::Retry(
            RetryPolicy::new(2)
                .with_initial_backoff(Duration::from_millis(10))
                .with_max_backoff(Duration::from_millis(20)),
        );
        let watcher = start_with_policy(&store, policy);

        store.set_unavailable(true);
        ticks(2).await;

        assert!(!watcher.is_polling());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
