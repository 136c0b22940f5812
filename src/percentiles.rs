//! Percentile latency tracking using HDR Histogram.
//!
//! Backs the trend metrics (`latency`, `http_req_duration`). Values are
//! recorded in milliseconds; the histogram covers 1 ms to one hour so that
//! iterations falling into the over-one-minute bucket are still represented.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::Mutex;
use tracing::warn;

/// Largest latency the histogram can hold, in milliseconds.
pub const MAX_TRACKED_MS: u64 = 3_600_000;

/// Percentile statistics for a set of latency measurements (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={}ms, max={}ms, avg={:.2}ms, med={}ms, p90={}ms, p95={}ms, p99={}ms",
            self.count, self.min, self.max, self.mean, self.p50, self.p90, self.p95, self.p99,
        )
    }
}

/// Thread-safe percentile tracker.
pub struct PercentileTracker {
    histogram: Mutex<Histogram<u64>>,
}

impl PercentileTracker {
    /// Configures the histogram for 1 ms .. 1 h with 3 significant digits.
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKED_MS, 3).expect("Failed to create histogram");

        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Record a latency measurement in milliseconds.
    pub fn record_ms(&self, latency_ms: u64) {
        let mut hist = match self.histogram.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };

        let clamped = latency_ms.clamp(1, MAX_TRACKED_MS);
        if let Err(e) = hist.record(clamped) {
            warn!(
                latency_ms = latency_ms,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    /// Value at the given percentile (0-100), or None when empty.
    pub fn value_at_percentile(&self, percentile: f64) -> Option<u64> {
        let hist = self.histogram.lock().ok()?;
        if hist.is_empty() {
            return None;
        }
        Some(hist.value_at_percentile(percentile))
    }

    /// Get current percentile statistics, or None if nothing was recorded.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = self.histogram.lock().ok()?;

        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_has_no_stats() {
        let tracker = PercentileTracker::new();
        assert!(tracker.stats().is_none());
        assert!(tracker.value_at_percentile(95.0).is_none());
    }

    #[test]
    fn uniform_distribution_percentiles() {
        let tracker = PercentileTracker::new();
        for ms in 1..=100 {
            tracker.record_ms(ms);
        }

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 100);
        assert_eq!(stats.p50, 50);
        assert_eq!(stats.p95, 95);
        assert!((stats.mean - 50.5).abs() < 0.5);
    }

    #[test]
    fn values_above_one_minute_are_kept() {
        let tracker = PercentileTracker::new();
        tracker.record_ms(75_000);
        let stats = tracker.stats().unwrap();
        assert!(stats.max >= 74_900 && stats.max <= 75_100, "max {}", stats.max);
    }

    #[test]
    fn zero_is_clamped_to_one() {
        let tracker = PercentileTracker::new();
        tracker.record_ms(0);
        assert_eq!(tracker.stats().unwrap().min, 1);
    }

    #[test]
    fn format_contains_percentiles() {
        let tracker = PercentileTracker::new();
        tracker.record_ms(20);
        let formatted = tracker.stats().unwrap().format();
        assert!(formatted.contains("p95=20ms"), "{}", formatted);
        assert!(formatted.contains("count=1"));
    }
}
