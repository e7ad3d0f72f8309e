//! Built-in metrics for watcher operations.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Poll ticks, detected changes and poll errors
//! - Publish successes and failures
//! - Time since the last change
//!
//! # Examples
//!
//! ```rust,no_run
//! use kv_watcher::prelude::*;
//! use kv_watcher::metrics::WatcherMetrics;
//! use opentelemetry::global;
//!
//! # async fn example() -> Result<()> {
//! let meter = global::meter("my-app");
//!
//! let watcher = ChangeWatcher::builder()
//!     .with_key("policy_rev")
//!     .with_address("memory://policies")
//!     .with_metrics(WatcherMetrics::new(meter))
//!     .build::<MemoryStore>()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod watcher_metrics;

pub use watcher_metrics::WatcherMetrics;
