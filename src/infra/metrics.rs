//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations (sample ingestion runs at the sensor
//! rate). Reporting swaps the periodic counters to zero.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; never use them for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Classification latency bucket boundaries (microseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, >3200
const BUCKET_BOUNDS: [u64; 7] = [50, 100, 200, 400, 800, 1600, 3200];
const NUM_BUCKETS: usize = 8;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Samples folded into the rolling buffer (monotonic)
    samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Samples dropped because the session owner fell behind (monotonic)
    samples_dropped: AtomicU64,
    /// Analysis windows classified (monotonic)
    windows_total: AtomicU64,
    /// Classification latency sum / max / histogram (reset on report)
    classify_sum_us: AtomicU64,
    classify_max_us: AtomicU64,
    classify_buckets: [AtomicU64; NUM_BUCKETS],
    /// Persistence commands queued to the worker (monotonic)
    snapshots_queued: AtomicU64,
    /// Persistence commands refused because the queue was full (monotonic)
    snapshots_dropped: AtomicU64,
    /// Store operations that returned an error (monotonic)
    store_failures: AtomicU64,
    sessions_saved: AtomicU64,
    sessions_discarded: AtomicU64,
    alarms_fired_stage: AtomicU64,
    alarms_fired_deadline: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            windows_total: AtomicU64::new(0),
            classify_sum_us: AtomicU64::new(0),
            classify_max_us: AtomicU64::new(0),
            classify_buckets: Default::default(),
            snapshots_queued: AtomicU64::new(0),
            snapshots_dropped: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            sessions_saved: AtomicU64::new(0),
            sessions_discarded: AtomicU64::new(0),
            alarms_fired_stage: AtomicU64::new(0),
            alarms_fired_deadline: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_classified(&self, latency_us: u64) {
        self.windows_total.fetch_add(1, Ordering::Relaxed);
        self.classify_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.classify_max_us, latency_us);
        self.classify_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_queued(&self) {
        self.snapshots_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_dropped(&self) {
        self.snapshots_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_saved(&self) {
        self.sessions_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_discarded(&self) {
        self.sessions_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarm_fired(&self, by_deadline: bool) {
        if by_deadline {
            self.alarms_fired_deadline.fetch_add(1, Ordering::Relaxed);
        } else {
            self.alarms_fired_stage.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    pub fn windows_total(&self) -> u64 {
        self.windows_total.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    pub fn snapshots_dropped(&self) -> u64 {
        self.snapshots_dropped.load(Ordering::Relaxed)
    }

    pub fn sessions_discarded(&self) -> u64 {
        self.sessions_discarded.load(Ordering::Relaxed)
    }

    pub fn alarms_fired(&self) -> u64 {
        self.alarms_fired_stage.load(Ordering::Relaxed)
            + self.alarms_fired_deadline.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let samples_count = self.samples_since_report.swap(0, Ordering::Relaxed);
        let classify_sum = self.classify_sum_us.swap(0, Ordering::Relaxed);
        let classify_max = self.classify_max_us.swap(0, Ordering::Relaxed);
        let mut classify_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.classify_buckets.iter().enumerate() {
            classify_buckets[i] = bucket.swap(0, Ordering::Relaxed);
        }
        let windows_in_period: u64 = classify_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            samples_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            samples_per_sec,
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            windows_total: self.windows_total.load(Ordering::Relaxed),
            classify_avg_us: if windows_in_period > 0 { classify_sum / windows_in_period } else { 0 },
            classify_max_us: classify_max,
            classify_buckets,
            snapshots_queued: self.snapshots_queued.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            sessions_saved: self.sessions_saved.load(Ordering::Relaxed),
            sessions_discarded: self.sessions_discarded.load(Ordering::Relaxed),
            alarms_fired_stage: self.alarms_fired_stage.load(Ordering::Relaxed),
            alarms_fired_deadline: self.alarms_fired_deadline.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub samples_dropped: u64,
    pub windows_total: u64,
    pub classify_avg_us: u64,
    pub classify_max_us: u64,
    pub classify_buckets: [u64; NUM_BUCKETS],
    pub snapshots_queued: u64,
    pub snapshots_dropped: u64,
    pub store_failures: u64,
    pub sessions_saved: u64,
    pub sessions_discarded: u64,
    pub alarms_fired_stage: u64,
    pub alarms_fired_deadline: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            samples_dropped = %self.samples_dropped,
            windows_total = %self.windows_total,
            classify_avg_us = %self.classify_avg_us,
            classify_max_us = %self.classify_max_us,
            snapshots_queued = %self.snapshots_queued,
            snapshots_dropped = %self.snapshots_dropped,
            store_failures = %self.store_failures,
            sessions_saved = %self.sessions_saved,
            sessions_discarded = %self.sessions_discarded,
            alarms_stage = %self.alarms_fired_stage,
            alarms_deadline = %self.alarms_fired_deadline,
            "metrics_summary"
        );
    }
}
