//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap). Scraping only loads, so a
//! Prometheus scrape never resets what the periodic reporter sees.
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

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

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
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

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

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
    /// Total frames analyzed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max frame latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Frame processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of frame latencies since start (monotonic)
    latency_sum_total_us: AtomicU64,
    /// Max frame latency since start (monotonic)
    latency_max_total_us: AtomicU64,
    /// Latency histogram since start (monotonic)
    latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Regions received from the extractor (monotonic)
    regions_total: AtomicU64,
    /// Regions above the area threshold (monotonic)
    regions_kept_total: AtomicU64,
    /// Counting-line events (monotonic)
    vehicles_counted_total: AtomicU64,
    /// Transits matched at the speed line (monotonic)
    transits_completed_total: AtomicU64,
    /// Transits evicted after the wait budget (monotonic)
    transits_expired_total: AtomicU64,
    /// Speed-line triggers with nothing pending (monotonic)
    speed_triggers_unmatched_total: AtomicU64,
    /// Egress records dropped due to channel full (monotonic)
    egress_dropped_total: AtomicU64,
    /// Malformed feed lines skipped (monotonic)
    feed_lines_skipped_total: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_total_us: AtomicU64::new(0),
            latency_max_total_us: AtomicU64::new(0),
            latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            regions_total: AtomicU64::new(0),
            regions_kept_total: AtomicU64::new(0),
            vehicles_counted_total: AtomicU64::new(0),
            transits_completed_total: AtomicU64::new(0),
            transits_expired_total: AtomicU64::new(0),
            speed_triggers_unmatched_total: AtomicU64::new(0),
            egress_dropped_total: AtomicU64::new(0),
            feed_lines_skipped_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
            started: Instant::now(),
        }
    }

    /// Record a processed frame with its latency and region counts
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64, regions: usize, kept: usize) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_total_us, latency_us);
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
        self.regions_total.fetch_add(regions as u64, Ordering::Relaxed);
        self.regions_kept_total.fetch_add(kept as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_vehicle_counted(&self) {
        self.vehicles_counted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transit_completed(&self) {
        self.transits_completed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transits_expired(&self, n: usize) {
        self.transits_expired_total.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_speed_trigger_unmatched(&self) {
        self.speed_triggers_unmatched_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_feed_line_skipped(&self) {
        self.feed_lines_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn vehicles_counted_total(&self) -> u64 {
        self.vehicles_counted_total.load(Ordering::Relaxed)
    }

    pub fn transits_completed_total(&self) -> u64 {
        self.transits_completed_total.load(Ordering::Relaxed)
    }

    pub fn transits_expired_total(&self) -> u64 {
        self.transits_expired_total.load(Ordering::Relaxed)
    }

    pub fn speed_triggers_unmatched_total(&self) -> u64 {
        self.speed_triggers_unmatched_total.load(Ordering::Relaxed)
    }

    pub fn egress_dropped_total(&self) -> u64 {
        self.egress_dropped_total.load(Ordering::Relaxed)
    }

    pub fn feed_lines_skipped_total(&self) -> u64 {
        self.feed_lines_skipped_total.load(Ordering::Relaxed)
    }

    /// Generate a summary and reset periodic counters
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

        self.summarize(frames_count, frames_per_sec, latency_sum, max_latency, lat_buckets)
    }

    /// Cumulative summary since start; nothing is reset
    pub fn scrape(&self) -> MetricsSummary {
        let frames_total = self.frames_total();
        let uptime = self.started.elapsed().as_secs_f64();
        let frames_per_sec = if uptime > 0.0 { frames_total as f64 / uptime } else { 0.0 };

        self.summarize(
            frames_total,
            frames_per_sec,
            self.latency_sum_total_us.load(Ordering::Relaxed),
            self.latency_max_total_us.load(Ordering::Relaxed),
            load_buckets(&self.latency_buckets_total),
        )
    }

    fn summarize(
        &self,
        frames_count: u64,
        frames_per_sec: f64,
        latency_sum: u64,
        max_latency: u64,
        lat_buckets: [u64; NUM_BUCKETS],
    ) -> MetricsSummary {
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total(),
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            latency_sum_us: latency_sum,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            regions_total: self.regions_total.load(Ordering::Relaxed),
            regions_kept_total: self.regions_kept_total.load(Ordering::Relaxed),
            vehicles_counted_total: self.vehicles_counted_total(),
            transits_completed_total: self.transits_completed_total(),
            transits_expired_total: self.transits_expired_total(),
            speed_triggers_unmatched_total: self.speed_triggers_unmatched_total(),
            egress_dropped_total: self.egress_dropped_total(),
            feed_lines_skipped_total: self.feed_lines_skipped_total(),
        }
    }
}

/// Metrics summary, either for the last report period or since start
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    /// Sum of the latencies counted in `lat_buckets`
    pub latency_sum_us: u64,
    /// Frame latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub regions_total: u64,
    pub regions_kept_total: u64,
    pub vehicles_counted_total: u64,
    pub transits_completed_total: u64,
    pub transits_expired_total: u64,
    pub speed_triggers_unmatched_total: u64,
    pub egress_dropped_total: u64,
    pub feed_lines_skipped_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            p99_us = %self.lat_p99_us,
            counted = %self.vehicles_counted_total,
            completed = %self.transits_completed_total,
            expired = %self.transits_expired_total,
            unmatched = %self.speed_triggers_unmatched_total,
            egress_dropped = %self.egress_dropped_total,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.frames_total(), 0);
        assert_eq!(metrics.vehicles_counted_total(), 0);
    }

    #[test]
    fn test_record_frame() {
        let metrics = Metrics::new();

        metrics.record_frame_processed(100, 4, 1);
        assert_eq!(metrics.frames_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_frame_processed(200, 2, 2);
        assert_eq!(metrics.frames_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
        assert_eq!(metrics.regions_total.load(Ordering::Relaxed), 6);
        assert_eq!(metrics.regions_kept_total.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(60000), 10);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.99), 0);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(150, 1, 1);
        metrics.record_frame_processed(250, 1, 1);
        metrics.record_vehicle_counted();
        metrics.record_transits_expired(2);

        let summary = metrics.report();
        assert_eq!(summary.frames_total, 2);
        assert_eq!(summary.avg_frame_latency_us, 200);
        assert_eq!(summary.max_frame_latency_us, 250);
        assert_eq!(summary.vehicles_counted_total, 1);
        assert_eq!(summary.transits_expired_total, 2);

        let second = metrics.report();
        assert_eq!(second.frames_total, 2);
        assert_eq!(second.avg_frame_latency_us, 0);
        assert_eq!(second.max_frame_latency_us, 0);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 0);
        assert_eq!(second.vehicles_counted_total, 1);
    }

    #[test]
    fn test_scrape_is_cumulative_and_leaves_report_intact() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(150, 1, 1);
        metrics.record_frame_processed(250, 1, 1);

        let first = metrics.scrape();
        let second = metrics.scrape();
        assert_eq!(first.lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(second.latency_sum_us, 400);
        assert_eq!(second.max_frame_latency_us, 250);

        // The reporter still sees the period the scrapes read
        let report = metrics.report();
        assert_eq!(report.avg_frame_latency_us, 200);
        assert_eq!(report.lat_buckets.iter().sum::<u64>(), 2);

        // And the report reset does not touch the lifetime view
        metrics.record_frame_processed(100, 0, 0);
        let after = metrics.scrape();
        assert_eq!(after.lat_buckets.iter().sum::<u64>(), 3);
        assert_eq!(after.latency_sum_us, 500);
        assert_eq!(metrics.report().lat_buckets.iter().sum::<u64>(), 1);
    }
}
