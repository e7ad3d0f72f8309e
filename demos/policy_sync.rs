//! Example demonstrating two processes keeping a policy in sync.
//!
//! Both "processes" live in this binary and share one in-memory store, which
//! stands in for a real TiKV cluster.

use kv_watcher::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Policy Sync Example ===\n");

    let address = "memory://policy-sync-demo";
    let interval = Duration::from_millis(200);

    let node_a = ChangeWatcher::connect::<MemoryStore>("policy_rev", interval, address).await?;
    let node_b = ChangeWatcher::builder()
        .with_key("policy_rev")
        .with_poll_interval(interval)
        .with_address(address)
        .with_retry(RetryPolicy::new(3))
        .build::<MemoryStore>()
        .await?;

    node_a.set_callback(|rev| println!("[node-a] peer changed policy, reloading (revision {rev})"));
    node_b.set_callback(|rev| println!("[node-b] peer changed policy, reloading (revision {rev})"));

    println!("node-a saves a policy change");
    let rev = node_a.publish().await?;
    println!("node-a published revision {rev}");
    tokio::time::sleep(interval * 2).await;

    println!("\nnode-b saves a policy change");
    let rev = node_b.publish().await?;
    println!("node-b published revision {rev}");
    tokio::time::sleep(interval * 2).await;

    node_a.close();
    node_b.close();
    println!("\nDone.");
    Ok(())
}
