//! Integration tests for several watchers sharing one watch key.

use kv_watcher::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "casbin_policy_rev";
const INTERVAL: Duration = Duration::from_millis(100);

async fn watcher(address: &str) -> ChangeWatcher {
    ChangeWatcher::connect::<MemoryStore>(KEY, INTERVAL, address)
        .await
        .unwrap()
}

fn recorder(watcher: &ChangeWatcher) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    watcher.set_callback(move |value| seen_clone.lock().push(value));
    seen
}

async fn wait_ticks(n: u32) {
    tokio::time::sleep(INTERVAL * n + INTERVAL / 2).await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_notifies_peer_and_back() {
    let address = "memory://it-ping-pong";
    let a = watcher(address).await;
    let b = watcher(address).await;
    let seen_a = recorder(&a);
    let seen_b = recorder(&b);

    assert_eq!(a.publish().await.unwrap(), 1);
    assert_eq!(a.last_observed(), b"1");
    wait_ticks(1).await;

    assert_eq!(*seen_b.lock(), vec!["1".to_string()]);
    assert!(seen_a.lock().is_empty());

    assert_eq!(b.publish().await.unwrap(), 2);
    wait_ticks(1).await;

    assert_eq!(*seen_a.lock(), vec!["2".to_string()]);
    assert_eq!(*seen_b.lock(), vec!["1".to_string()]);

    let store = MemoryStore::named("it-ping-pong");
    assert_eq!(store.get(KEY.as_bytes()), Some(b"2".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_value_not_renotified() {
    let address = "memory://it-idempotent";
    let a = watcher(address).await;
    let b = watcher(address).await;
    let seen_b = recorder(&b);

    a.publish().await.unwrap();
    wait_ticks(5).await;

    assert_eq!(*seen_b.lock(), vec!["1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_publishes_are_monotonic() {
    let address = "memory://it-monotonic";
    let watchers = vec![
        watcher(address).await,
        watcher(address).await,
        watcher(address).await,
    ];

    for n in 1..=10u64 {
        let publisher = &watchers[(n as usize) % watchers.len()];
        assert_eq!(publisher.publish().await.unwrap(), n);
    }

    let store = MemoryStore::named("it-monotonic");
    assert_eq!(store.get(KEY.as_bytes()), Some(b"10".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_close_halts_notification() {
    let address = "memory://it-close";
    let a = watcher(address).await;
    let b = watcher(address).await;
    let seen_b = recorder(&b);

    b.close();
    a.publish().await.unwrap();
    wait_ticks(3).await;

    assert!(seen_b.lock().is_empty());
    assert!(!b.is_polling());
    assert!(a.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_decode_failure_leaves_key_unmodified() {
    let store = MemoryStore::named("it-decode");
    store.insert(KEY.as_bytes(), "v1-final");
    let a = watcher("memory://it-decode").await;

    let err = a.publish().await.unwrap_err();
    assert!(matches!(err, WatcherError::Decode { .. }));
    assert_eq!(store.get(KEY.as_bytes()), Some(b"v1-final".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_watcher_sees_existing_revision() {
    let store = MemoryStore::named("it-existing");
    store.insert(KEY.as_bytes(), "41");

    let late = watcher("memory://it-existing").await;
    let seen = recorder(&late);
    wait_ticks(1).await;

    assert_eq!(*seen.lock(), vec!["41".to_string()]);
    assert_eq!(late.publish().await.unwrap(), 42);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let result = ChangeWatcher::connect::<MemoryStore>(KEY, INTERVAL, "127.0.0.1:2379").await;
    assert!(matches!(result, Err(WatcherError::Connection(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_never_lose_a_committed_revision() {
    let address = "memory://it-concurrent";
    let watchers: Vec<Arc<ChangeWatcher>> = vec![
        Arc::new(watcher(address).await),
        Arc::new(watcher(address).await),
        Arc::new(watcher(address).await),
    ];

    let mut handles = Vec::new();
    for i in 0..30 {
        let w = Arc::clone(&watchers[i % watchers.len()]);
        handles.push(tokio::spawn(async move { w.publish().await }));
    }

    let mut committed = 0u64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(err) => assert!(matches!(err, WatcherError::Commit(_)), "{err}"),
        }
    }

    let store = MemoryStore::named("it-concurrent");
    assert_eq!(
        store.get(KEY.as_bytes()),
        Some(committed.to_string().into_bytes())
    );
}
