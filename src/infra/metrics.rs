//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that resets anything (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Frame processing latency bucket boundaries (microseconds)
/// Buckets: ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, ≤256000, >256000
const BUCKET_BOUNDS: [u64; 10] =
    [500, 1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [500, 1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000, 512_000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    /// Frames processed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max frame latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Frame latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Detections delivered by the tracker (monotonic)
    detections_total: AtomicU64,
    /// Detections skipped for malformed shape (monotonic)
    detections_skipped: AtomicU64,
    /// Detections rejected by box validation (monotonic)
    boxes_rejected: AtomicU64,
    /// Partial crops stored (monotonic)
    partial_crops_stored: AtomicU64,
    /// Crossing events emitted (monotonic)
    crossings_total: AtomicU64,
    /// Evidence files that failed to write (monotonic)
    evidence_write_failures: AtomicU64,
    /// State resets inferred from identity wraparound (monotonic)
    state_resets: AtomicU64,
    /// Frame results dropped as duplicate or out of order (monotonic)
    stale_results: AtomicU64,
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_stopped: AtomicU64,
    runs_failed: AtomicU64,
    /// 1 while an analysis run is active
    run_active: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            detections_total: AtomicU64::new(0),
            detections_skipped: AtomicU64::new(0),
            boxes_rejected: AtomicU64::new(0),
            partial_crops_stored: AtomicU64::new(0),
            crossings_total: AtomicU64::new(0),
            evidence_write_failures: AtomicU64::new(0),
            state_resets: AtomicU64::new(0),
            stale_results: AtomicU64::new(0),
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_stopped: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            run_active: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record one processed frame (lock-free)
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64, detections: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.detections_total.fetch_add(detections, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detection_skipped(&self) {
        self.detections_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_box_rejected(&self) {
        self.boxes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_partial_crop(&self) {
        self.partial_crops_stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_crossing(&self) {
        self.crossings_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evidence_write_failure(&self) {
        self.evidence_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_state_reset(&self) {
        self.state_resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_result(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        self.run_active.store(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.run_active.store(0, Ordering::Relaxed);
    }

    pub fn record_run_stopped(&self) {
        self.runs_stopped.fetch_add(1, Ordering::Relaxed);
        self.run_active.store(0, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.run_active.store(0, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn detections_total(&self) -> u64 {
        self.detections_total.load(Ordering::Relaxed)
    }

    pub fn detections_skipped(&self) -> u64 {
        self.detections_skipped.load(Ordering::Relaxed)
    }

    pub fn boxes_rejected(&self) -> u64 {
        self.boxes_rejected.load(Ordering::Relaxed)
    }

    pub fn partial_crops_stored(&self) -> u64 {
        self.partial_crops_stored.load(Ordering::Relaxed)
    }

    pub fn crossings_total(&self) -> u64 {
        self.crossings_total.load(Ordering::Relaxed)
    }

    pub fn evidence_write_failures(&self) -> u64 {
        self.evidence_write_failures.load(Ordering::Relaxed)
    }

    pub fn state_resets(&self) -> u64 {
        self.state_resets.load(Ordering::Relaxed)
    }

    pub fn stale_results(&self) -> u64 {
        self.stale_results.load(Ordering::Relaxed)
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_stopped(&self) -> u64 {
        self.runs_stopped.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn run_active(&self) -> bool {
        self.run_active.load(Ordering::Relaxed) == 1
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total(),
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            detections_total: self.detections_total(),
            detections_skipped: self.detections_skipped(),
            boxes_rejected: self.boxes_rejected(),
            partial_crops_stored: self.partial_crops_stored(),
            crossings_total: self.crossings_total(),
            evidence_write_failures: self.evidence_write_failures(),
            state_resets: self.state_resets(),
            stale_results: self.stale_results(),
            runs_started: self.runs_started(),
            runs_completed: self.runs_completed(),
            runs_stopped: self.runs_stopped(),
            runs_failed: self.runs_failed(),
            run_active: self.run_active(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    /// Frame latency histogram since last report
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub detections_total: u64,
    pub detections_skipped: u64,
    pub boxes_rejected: u64,
    pub partial_crops_stored: u64,
    pub crossings_total: u64,
    pub evidence_write_failures: u64,
    pub state_resets: u64,
    pub stale_results: u64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_stopped: u64,
    pub runs_failed: u64,
    pub run_active: bool,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            p50_us = %self.lat_p50_us,
            p99_us = %self.lat_p99_us,
            detections = %self.detections_total,
            skipped = %self.detections_skipped,
            rejected = %self.boxes_rejected,
            crossings = %self.crossings_total,
            write_failures = %self.evidence_write_failures,
            stale = %self.stale_results,
            run_active = %self.run_active,
            "metrics"
        );
    }
}
