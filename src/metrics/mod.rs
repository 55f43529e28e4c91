//! # Stage: Invocation Metrics Engine
//!
//! ## Responsibility
//! Ingests [`InvocationRecord`]s, keeps per-tool error aggregates current and
//! derives [`ToolMetrics`] snapshots on demand, served through a TTL cache.
//!
//! ## Guarantees
//! - Write-through: a record is durable in the store before `record` returns,
//!   and the affected tool's cache entry is dropped after the write
//! - No stale resurrection: a snapshot computed concurrently with a write is
//!   returned to its caller but never cached (per-tool generation counter)
//! - Totals: `success_count + failure_count == total_invocations` always
//! - Percentiles: `min <= p50 <= p95 <= p99 <= max` over successful calls
//!
//! ## NOT Responsible For
//! - Mining sessions for patterns (see `patterns`)
//! - Acting on metrics (see `strategy`)

pub mod classify;
pub mod stats;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;
use crate::types::{now_ms, InvocationRecord};

use classify::{classify_error, rank_error_patterns, ErrorPattern};
use stats::{compute_trends, BucketMetrics, LatencyStats};

/// Cached snapshots expire after this long unless configured otherwise.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// ToolMetrics
// ---------------------------------------------------------------------------

/// Derived statistics for one tool. Never stored, always recomputable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub tool_id: String,
    /// Name on the most recent record.
    pub tool_name: String,
    pub total_invocations: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage 0–100.
    pub success_rate: f64,
    // Latency figures cover successful invocations only.
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub last_invocation: u64,
    /// Most frequent first.
    pub error_patterns: Vec<ErrorPattern>,
    pub computed_at: u64,
}

impl ToolMetrics {
    /// All-zero snapshot for `tool_id`.
    pub fn empty(tool_id: impl Into<String>) -> Self {
        let tool_id = tool_id.into();
        Self {
            tool_name: tool_id.clone(),
            tool_id,
            total_invocations: 0,
            success_count: 0,
            failure_count: 0,
            success_rate: 0.0,
            avg_latency: 0.0,
            min_latency: 0.0,
            max_latency: 0.0,
            p50_latency: 0.0,
            p95_latency: 0.0,
            p99_latency: 0.0,
            last_invocation: 0,
            error_patterns: Vec::new(),
            computed_at: now_ms(),
        }
    }

    /// Build a snapshot from a tool's full history.
    pub fn from_records(
        tool_id: &str,
        records: &[InvocationRecord],
        mut error_patterns: Vec<ErrorPattern>,
    ) -> Self {
        let mut m = Self::empty(tool_id);
        let latest = records.iter().max_by_key(|r| r.timestamp);
        if let Some(latest) = latest {
            m.tool_name = latest.tool_name.clone();
            m.last_invocation = latest.timestamp;
        }

        let durations: Vec<u64> = records.iter().filter(|r| r.success).map(|r| r.duration_ms).collect();
        m.total_invocations = records.len() as u64;
        m.success_count = durations.len() as u64;
        m.failure_count = m.total_invocations - m.success_count;
        if m.total_invocations > 0 {
            m.success_rate = m.success_count as f64 / m.total_invocations as f64 * 100.0;
        }

        let lat = LatencyStats::from_durations(durations);
        m.avg_latency = lat.avg;
        m.min_latency = lat.min;
        m.max_latency = lat.max;
        m.p50_latency = lat.p50;
        m.p95_latency = lat.p95;
        m.p99_latency = lat.p99;

        rank_error_patterns(&mut error_patterns);
        m.error_patterns = error_patterns;
        m
    }

    /// Percentage of failed invocations.
    pub fn failure_rate(&self) -> f64 {
        if self.total_invocations == 0 {
            0.0
        } else {
            100.0 - self.success_rate
        }
    }
}

impl std::fmt::Display for ToolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} calls, {:.1}% ok, p95 {:.0}ms",
            self.tool_id, self.total_invocations, self.success_rate, self.p95_latency
        )
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    metrics: ToolMetrics,
    cached_at: Instant,
}

#[derive(Default)]
struct MetricsCache {
    entries: HashMap<String, CacheEntry>,
    /// Bumped on every write to the tool.
    generations: HashMap<String, u64>,
    /// Bumped on every full clear.
    epoch: u64,
}

impl MetricsCache {
    fn token(&self, tool_id: &str) -> (u64, u64) {
        (self.epoch, self.generations.get(tool_id).copied().unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// MetricsEngine
// ---------------------------------------------------------------------------

pub struct MetricsEngine {
    store: Arc<dyn Store>,
    ttl: Duration,
    cache: Mutex<MetricsCache>,
}

impl MetricsEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl, cache: Mutex::new(MetricsCache::default()) }
    }

    // Entries are recomputable from the store, so a poisoned lock is recovered.
    fn cache(&self) -> MutexGuard<'_, MetricsCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist `invocation`, fold a failure into its error aggregate and
    /// invalidate the tool's cached snapshot.
    pub fn record(&self, invocation: &InvocationRecord) -> Result<()> {
        self.store.append(invocation)?;
        if !invocation.success {
            let error_type = classify_error(invocation.error.as_deref().unwrap_or(""));
            self.store.record_error(
                &invocation.tool_id,
                error_type,
                &invocation.id,
                invocation.timestamp,
            )?;
            tracing::debug!(
                target: "toolwatch::metrics",
                tool_id = %invocation.tool_id,
                error_type = %error_type,
                "Recorded failed invocation"
            );
        }
        self.invalidate(&invocation.tool_id);
        Ok(())
    }

    /// Drop the cached snapshot for `tool_id` and fence out in-flight
    /// computations that started before this call.
    pub fn invalidate(&self, tool_id: &str) {
        let mut cache = self.cache();
        cache.entries.remove(tool_id);
        *cache.generations.entry(tool_id.to_string()).or_insert(0) += 1;
    }

    /// Current metrics for `tool_id`, `None` if the tool has no history.
    ///
    /// Served from cache when a fresh entry exists and `force_refresh` is
    /// false. The returned snapshot is recomputed otherwise.
    pub fn get_metrics(&self, tool_id: &str, force_refresh: bool) -> Result<Option<ToolMetrics>> {
        let token = {
            let cache = self.cache();
            if !force_refresh {
                if let Some(entry) = cache.entries.get(tool_id) {
                    if entry.cached_at.elapsed() < self.ttl {
                        return Ok(Some(entry.metrics.clone()));
                    }
                }
            }
            cache.token(tool_id)
        };

        let records = self.store.invocations_for_tool(tool_id)?;
        if records.is_empty() {
            return Ok(None);
        }
        let patterns = self.store.error_patterns_for_tool(tool_id)?;
        let metrics = ToolMetrics::from_records(tool_id, &records, patterns);

        let mut cache = self.cache();
        if cache.token(tool_id) == token {
            cache.entries.insert(
                tool_id.to_string(),
                CacheEntry { metrics: metrics.clone(), cached_at: Instant::now() },
            );
        }
        Ok(Some(metrics))
    }

    /// Metrics for every tool with history, busiest first.
    pub fn get_all_metrics(&self) -> Result<Vec<ToolMetrics>> {
        let mut all = Vec::new();
        for tool_id in self.store.tool_ids()? {
            if let Some(m) = self.get_metrics(&tool_id, false)? {
                all.push(m);
            }
        }
        all.sort_by(|a, b| {
            b.total_invocations
                .cmp(&a.total_invocations)
                .then(a.tool_id.cmp(&b.tool_id))
        });
        Ok(all)
    }

    /// Bucketed history for `tool_id`. Empty when the tool is unknown.
    pub fn get_trends(&self, tool_id: &str, interval_ms: u64) -> Result<Vec<BucketMetrics>> {
        let records = self.store.invocations_for_tool(tool_id)?;
        Ok(compute_trends(&records, interval_ms))
    }

    /// Delete invocations and error aggregates older than `older_than`,
    /// then clear the cache. Returns the number of invocations removed.
    pub fn cleanup(&self, older_than: Duration) -> Result<usize> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as u64);
        let removed = self.store.delete_invocations_before(cutoff)?;
        let patterns = self.store.delete_error_patterns_before(cutoff)?;
        {
            let mut cache = self.cache();
            cache.entries.clear();
            cache.epoch += 1;
        }
        tracing::info!(
            target: "toolwatch::metrics",
            cutoff,
            invocations = removed,
            error_patterns = patterns,
            "Invocation history cleaned up"
        );
        Ok(removed)
    }

    /// Number of cached snapshots. Exposed for diagnostics.
    pub fn cached_tools(&self) -> usize {
        self.cache().entries.len()
    }
}
