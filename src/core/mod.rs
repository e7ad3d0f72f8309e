//! Core watcher functionality.

mod builder;
mod retry;
pub mod revision;
mod watcher;

pub use builder::{ChangeWatcherBuilder, DEFAULT_POLL_INTERVAL};
pub use retry::{PollErrorPolicy, RetryConfig, RetryPolicy};
pub use watcher::{Callback, ChangeWatcher};
