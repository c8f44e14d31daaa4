use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Latency accumulator shared by every worker and drained by the reporter.
///
/// Latencies land in a single mutex-protected window (min/max/sum/count plus
/// a histogram for percentiles). Delivery and transaction outcomes are plain
/// atomics because they are bumped from completion callbacks.
pub struct LatencyAggregator {
    window: Mutex<Window>,
    delivery_errors: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    txn_failures: AtomicU64,
}

struct Window {
    min: Duration,
    max: Duration,
    sum: Duration,
    count: u64,
    // 1ns to 60s range, 3 significant digits
    hist: Histogram<u64>,
}

impl Window {
    fn new() -> Self {
        Self {
            min: Duration::MAX,
            max: Duration::ZERO,
            sum: Duration::ZERO,
            count: 0,
            hist: Histogram::new_with_bounds(1, 60_000_000_000, 3)
                .expect("constant histogram bounds are valid"),
        }
    }

    fn reset(&mut self) {
        self.min = Duration::MAX;
        self.max = Duration::ZERO;
        self.sum = Duration::ZERO;
        self.count = 0;
        self.hist.reset();
    }
}

impl Default for LatencyAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyAggregator {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window::new()),
            delivery_errors: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            txn_failures: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the enqueue latency of one send.
    pub fn record(&self, latency: Duration) {
        let mut w = self.lock();
        w.min = w.min.min(latency);
        w.max = w.max.max(latency);
        w.sum = w.sum.saturating_add(latency);
        w.count += 1;
        w.hist.saturating_record((latency.as_nanos() as u64).max(1));
    }

    pub fn record_delivery_error(&self) {
        self.delivery_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_txn_failure(&self) {
        self.txn_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the current window and start a fresh one.
    pub fn drain_and_reset(&self) -> LatencySnapshot {
        let mut w = self.lock();
        let count = w.count;
        let (min, max, avg, p50, p99) = if count == 0 {
            (None, None, None, None, None)
        } else {
            let avg_ns = w.sum.as_nanos() / u128::from(count);
            (
                Some(w.min),
                Some(w.max),
                Some(Duration::from_nanos(avg_ns as u64)),
                Some(Duration::from_nanos(w.hist.value_at_quantile(0.5))),
                Some(Duration::from_nanos(w.hist.value_at_quantile(0.99))),
            )
        };
        let sum = w.sum;
        w.reset();
        drop(w);

        LatencySnapshot {
            timestamp: Utc::now(),
            count,
            sum,
            min,
            max,
            avg,
            p50,
            p99,
            delivery_errors: self.delivery_errors.swap(0, Ordering::Relaxed),
            committed: self.committed.swap(0, Ordering::Relaxed),
            aborted: self.aborted.swap(0, Ordering::Relaxed),
            txn_failures: self.txn_failures.swap(0, Ordering::Relaxed),
        }
    }
}

/// One drained reporting window. Latency fields are `None` when nothing was sent.
#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
    pub sum: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub avg: Option<Duration>,
    pub p50: Option<Duration>,
    pub p99: Option<Duration>,
    pub delivery_errors: u64,
    pub committed: u64,
    pub aborted: u64,
    pub txn_failures: u64,
}

/// Flat CSV projection of a [`LatencySnapshot`].
#[derive(Debug, Serialize)]
pub struct SnapshotRow {
    pub timestamp: String,
    pub count: u64,
    pub latency_ns_min: u64,
    pub latency_ns_max: u64,
    pub latency_ns_avg: u64,
    pub latency_ns_p50: u64,
    pub latency_ns_p99: u64,
    pub delivery_errors: u64,
    pub committed: u64,
    pub aborted: u64,
    pub txn_failures: u64,
}

fn nanos(d: Option<Duration>) -> u64 {
    d.map(|d| d.as_nanos() as u64).unwrap_or(0)
}

impl LatencySnapshot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn row(&self) -> SnapshotRow {
        SnapshotRow {
            timestamp: self.timestamp.to_rfc3339(),
            count: self.count,
            latency_ns_min: nanos(self.min),
            latency_ns_max: nanos(self.max),
            latency_ns_avg: nanos(self.avg),
            latency_ns_p50: nanos(self.p50),
            latency_ns_p99: nanos(self.p99),
            delivery_errors: self.delivery_errors,
            committed: self.committed,
            aborted: self.aborted,
            txn_failures: self.txn_failures,
        }
    }
}
