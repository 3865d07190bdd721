//! # Client Statistics
//!
//! Provide lightweight counters and a latency histogram describing what the
//! dispatch loop did on one connection: commands, retries, reconnects,
//! timeouts and round-trip latency.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array for cache locality.
//! 3. **Zero-Cost Access**: Expose snapshots as plain structs without heap work
//!    beyond the bucket vectors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] =
    [50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 500_000];

/// Snapshot of all client counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Commands handed to the dispatch loop (each queued command counts once).
    pub commands_total: u64,
    /// Error replies returned by the server.
    pub server_errors_total: u64,
    /// Retries performed after transient faults.
    pub retries_total: u64,
    /// Successful connects after the first one.
    pub reconnects_total: u64,
    /// Retry budgets exhausted.
    pub timeouts_total: u64,
    /// Round-trip latency histogram.
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

/// Per-connection statistics aggregator.
///
/// `Ordering::Relaxed` is sufficient: counters are independent and only need
/// to be eventually visible to whoever takes a snapshot.
pub struct ClientStats {
    commands_total: AtomicU64,
    server_errors_total: AtomicU64,
    retries_total: AtomicU64,
    reconnects_total: AtomicU64,
    timeouts_total: AtomicU64,
    latency: LatencyHistogram,
}

impl Default for ClientStats {
    fn default() -> Self {
        ClientStats::new()
    }
}

impl ClientStats {
    /// Creates an aggregator with the default latency buckets.
    pub fn new() -> Self {
        ClientStats::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates an aggregator with custom bucket boundaries (ascending, microseconds).
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        ClientStats {
            commands_total: AtomicU64::new(0),
            server_errors_total: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            reconnects_total: AtomicU64::new(0),
            timeouts_total: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    pub fn record_commands(&self, count: u64) {
        self.commands_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_server_error(&self) {
        self.server_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one flush-to-last-reply round trip.
    pub fn record_latency(&self, latency: Duration) {
        self.latency.record(latency);
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commands_total: self.commands_total.load(Ordering::Relaxed),
            server_errors_total: self.server_errors_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
            timeouts_total: self.timeouts_total.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Uses a linear scan to pick buckets; the list is small and stays hot in cache.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_us.len() + 1` buckets (last is overflow).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Records a latency measurement.
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the histogram.
    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
