//! Latency distribution and time-bucketed trend statistics.
//!
//! Percentiles use the nearest-rank method: sort ascending and take index
//! `floor(n * q)` (clamped to `n - 1`). This is intentionally simple and biased
//! low-to-coarse for small samples (roughly `n < 100`); treat the values as
//! operational signals, not exact statistics.

use serde::{Deserialize, Serialize};

use crate::types::InvocationRecord;

/// Nearest-rank percentile over an ascending-sorted slice.
///
/// Returns `0.0` for an empty slice.
pub fn percentile(sorted: &[u64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    sorted[idx] as f64
}

// ---------------------------------------------------------------------------
// LatencyStats
// ---------------------------------------------------------------------------

/// Summary of a latency sample, all values in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyStats {
    /// Compute from unsorted durations. An empty sample yields all zeros.
    pub fn from_durations(mut durations: Vec<u64>) -> Self {
        if durations.is_empty() {
            return Self::default();
        }
        durations.sort_unstable();
        let n = durations.len();
        let sum: u128 = durations.iter().map(|&d| d as u128).sum();
        Self {
            avg: sum as f64 / n as f64,
            min: durations[0] as f64,
            max: durations[n - 1] as f64,
            p50: percentile(&durations, 0.50),
            p95: percentile(&durations, 0.95),
            p99: percentile(&durations, 0.99),
        }
    }
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

/// Statistics for one time window of a tool's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketMetrics {
    /// Inclusive window start, ms since epoch.
    pub start: u64,
    /// Exclusive window end.
    pub end: u64,
    pub count: u64,
    /// Percentage 0–100.
    pub success_rate: f64,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
}

/// Partition `records` into contiguous `interval_ms` windows starting at the
/// earliest timestamp. Empty windows are omitted. Latency covers every record
/// in the window, successful or not.
///
/// `records` need not be sorted. An `interval_ms` of zero yields no buckets.
pub fn compute_trends(records: &[InvocationRecord], interval_ms: u64) -> Vec<BucketMetrics> {
    if records.is_empty() || interval_ms == 0 {
        return Vec::new();
    }
    let start = records.iter().map(|r| r.timestamp).min().unwrap_or(0);

    // bucket index -> (count, successes, sum, min, max)
    let mut buckets: std::collections::BTreeMap<u64, (u64, u64, u128, u64, u64)> =
        std::collections::BTreeMap::new();
    for r in records {
        let idx = (r.timestamp - start) / interval_ms;
        let e = buckets.entry(idx).or_insert((0, 0, 0, u64::MAX, 0));
        e.0 += 1;
        if r.success {
            e.1 += 1;
        }
        e.2 += r.duration_ms as u128;
        e.3 = e.3.min(r.duration_ms);
        e.4 = e.4.max(r.duration_ms);
    }

    buckets
        .into_iter()
        .map(|(idx, (count, ok, sum, min, max))| {
            let bucket_start = start + idx * interval_ms;
            BucketMetrics {
                start: bucket_start,
                end: bucket_start.saturating_add(interval_ms),
                count,
                success_rate: ok as f64 / count as f64 * 100.0,
                avg_latency: sum as f64 / count as f64,
                min_latency: min as f64,
                max_latency: max as f64,
            }
        })
        .collect()
}
