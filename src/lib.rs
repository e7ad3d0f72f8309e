//! # kv-watcher
//!
//! Cross-process change notification over a shared transactional key-value store.
//!
//! ## Overview
//!
//! Processes that keep a locally enforced copy of shared state (an access-control
//! policy, a routing table) need to know when a peer changed it. `kv-watcher`
//! gives each process a [`ChangeWatcher`](core::ChangeWatcher) bound to one watch
//! key in a shared store:
//! - `publish()` increments a revision counter at the watch key in a transaction
//! - every watcher polls the key on a fixed interval and invokes its callback
//!   when the value changed since it last looked
//! - the publisher records its own revision, so only peers are notified
//!
//! Delivery is best effort: intermediate revisions may be coalesced into a
//! single notification.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kv_watcher::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> kv_watcher::error::Result<()> {
//! let watcher = ChangeWatcher::connect::<MemoryStore>(
//!     "casbin_policy_rev",
//!     Duration::from_millis(500),
//!     "memory://policies",
//! )
//! .await?;
//!
//! watcher.set_callback(|revision| {
//!     println!("policy changed by a peer (revision {revision}), reloading");
//! });
//!
//! // After saving a policy change:
//! watcher.publish().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tikv`: [`TikvStore`](store::TikvStore), a TiKV backend using `tikv-client`
//! - `metrics`: OpenTelemetry metrics for polls and publishes

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod settings;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        ChangeWatcher, ChangeWatcherBuilder, PollErrorPolicy, RetryPolicy,
    };
    pub use crate::error::{Result, WatcherError};
    pub use crate::settings::WatcherConfig;
    pub use crate::store::{Connect, MemoryStore, Transaction, TransactionalStore};

    #[cfg(feature = "tikv")]
    pub use crate::store::TikvStore;
}
