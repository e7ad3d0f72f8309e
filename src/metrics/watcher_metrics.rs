//! Watcher metrics tracking using OpenTelemetry.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for watcher operations.
///
/// Tracks poll ticks, detected changes, poll errors, publish outcomes and the
/// time since the last detected change using OpenTelemetry metrics.
///
/// # Examples
///
/// ```rust,no_run
/// use kv_watcher::metrics::WatcherMetrics;
/// use opentelemetry::global;
///
/// let meter = global::meter("kv-watcher");
/// let metrics = WatcherMetrics::new(meter);
///
/// metrics.record_tick();
/// metrics.record_change();
/// ```
#[derive(Clone)]
pub struct WatcherMetrics {
    poll_ticks: Counter<u64>,
    changes_detected: Counter<u64>,
    poll_errors: Counter<u64>,
    publish_success: Counter<u64>,
    publish_failures: Counter<u64>,
    change_age_seconds: Gauge<i64>,
    last_change: Arc<parking_lot::Mutex<Instant>>,
}

impl WatcherMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let poll_ticks = meter
            .u64_counter("kv_watcher.poll.ticks")
            .with_description("Total number of poll ticks")
            .build();

        let changes_detected = meter
            .u64_counter("kv_watcher.poll.changes")
            .with_description("Number of ticks that observed a changed watch key")
            .build();

        let poll_errors = meter
            .u64_counter("kv_watcher.poll.errors")
            .with_description("Number of failed poll ticks")
            .build();

        let publish_success = meter
            .u64_counter("kv_watcher.publish.success")
            .with_description("Number of committed revisions")
            .build();

        let publish_failures = meter
            .u64_counter("kv_watcher.publish.failures")
            .with_description("Number of failed publish attempts")
            .build();

        let change_age_seconds = meter
            .i64_gauge("kv_watcher.change.age")
            .with_description("Time since the last detected or published change in seconds")
            .with_unit("s")
            .build();

        Self {
            poll_ticks,
            changes_detected,
            poll_errors,
            publish_success,
            publish_failures,
            change_age_seconds,
            last_change: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    /// Record one poll tick.
    pub fn record_tick(&self) {
        self.poll_ticks.add(1, &[]);
    }

    /// Record a tick that observed a new value.
    pub fn record_change(&self) {
        self.changes_detected.add(1, &[]);
        *self.last_change.lock() = Instant::now();
    }

    /// Record a failed poll tick.
    pub fn record_poll_error(&self) {
        self.poll_errors.add(1, &[]);
    }

    /// Record the outcome of a publish.
    pub fn record_publish(&self, success: bool) {
        if success {
            self.publish_success.add(1, &[]);
            *self.last_change.lock() = Instant::now();
        } else {
            self.publish_failures.add(1, &[]);
        }
    }

    /// Update the change age gauge.
    ///
    /// This should be called periodically to track how long this process has
    /// gone without seeing a change.
    pub fn update_change_age(&self) {
        let age_secs = self.last_change.lock().elapsed().as_secs() as i64;
        self.change_age_seconds.record(age_secs, &[]);
    }
}
