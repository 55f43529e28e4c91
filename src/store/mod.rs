//! # Stage: Store
//!
//! ## Responsibility
//! Durable home for every record the crate writes: invocations and their
//! per-tool error aggregates ([`InvocationStore`]), plus mined patterns and
//! strategy output ([`HistoryStore`]).
//!
//! Two backends ship with the crate:
//!
//! - [`memory::MemoryStore`]: process-local, one `RwLock` over all tables
//! - [`sqlite::SqliteStore`]: single-file SQLite database in WAL mode
//!
//! ## Guarantees
//! - Invocations for one tool come back ordered by timestamp, ties broken by
//!   insertion order
//! - `record_error` is an atomic read-modify-write per `(tool, error_type)`
//! - Healing actions, suggestions and feedback list in insertion order
//!
//! ## NOT Responsible For
//! - Caching (see `metrics`)
//! - Deciding what to retain (callers pass explicit cutoffs)

pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::classify::{ErrorPattern, ErrorType};
use crate::patterns::{AntiPattern, DiscoveredPattern};
use crate::strategy::types::{FallbackChain, Feedback, OptimizationSuggestion, SelfHealingAction};
use crate::types::{now_ms, InvocationRecord};

/// Raw invocation log and per-tool error aggregates.
pub trait InvocationStore: Send + Sync {
    /// Append one record. Ids must be unique.
    fn append(&self, record: &InvocationRecord) -> Result<()>;

    fn get_invocation(&self, id: &str) -> Result<Option<InvocationRecord>>;

    /// Oldest first.
    fn invocations_for_tool(&self, tool_id: &str) -> Result<Vec<InvocationRecord>>;

    /// Newest first, at most `limit` records.
    fn recent_invocations_for_tool(&self, tool_id: &str, limit: usize) -> Result<Vec<InvocationRecord>>;

    /// Oldest first.
    fn invocations_for_session(&self, session_id: &str) -> Result<Vec<InvocationRecord>>;

    /// Records with `timestamp >= since_ms`, oldest first.
    fn invocations_since(&self, since_ms: u64) -> Result<Vec<InvocationRecord>>;

    fn all_invocations(&self) -> Result<Vec<InvocationRecord>>;

    /// Distinct tool ids with at least one record, sorted.
    fn tool_ids(&self) -> Result<Vec<String>>;

    /// Delete records with `timestamp < cutoff_ms`. Returns the count removed.
    fn delete_invocations_before(&self, cutoff_ms: u64) -> Result<usize>;

    /// Fold one failure into the `(tool_id, error_type)` aggregate, creating
    /// it on first sight.
    fn record_error(
        &self,
        tool_id: &str,
        error_type: ErrorType,
        invocation_id: &str,
        at_ms: u64,
    ) -> Result<()>;

    fn error_patterns_for_tool(&self, tool_id: &str) -> Result<Vec<ErrorPattern>>;

    fn all_error_patterns(&self) -> Result<Vec<ErrorPattern>>;

    /// Delete aggregates whose `last_seen < cutoff_ms`.
    fn delete_error_patterns_before(&self, cutoff_ms: u64) -> Result<usize>;
}

/// Counts of rows removed by [`HistoryStore::prune_history`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub patterns: usize,
    pub anti_patterns: usize,
    pub healing_actions: usize,
    pub suggestions: usize,
    pub feedback: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.patterns + self.anti_patterns + self.healing_actions + self.suggestions + self.feedback
    }
}

/// Mined patterns and strategy output.
pub trait HistoryStore: Send + Sync {
    /// Insert or replace by id.
    fn upsert_pattern(&self, pattern: &DiscoveredPattern) -> Result<()>;
    fn get_pattern(&self, id: &str) -> Result<Option<DiscoveredPattern>>;
    fn list_patterns(&self) -> Result<Vec<DiscoveredPattern>>;

    fn upsert_anti_pattern(&self, anti_pattern: &AntiPattern) -> Result<()>;
    fn list_anti_patterns(&self) -> Result<Vec<AntiPattern>>;

    fn insert_healing_action(&self, action: &SelfHealingAction) -> Result<()>;
    /// All actions, or only those for `tool_id`. Oldest first.
    fn list_healing_actions(&self, tool_id: Option<&str>) -> Result<Vec<SelfHealingAction>>;

    fn insert_suggestion(&self, suggestion: &OptimizationSuggestion) -> Result<()>;
    fn list_suggestions(&self, tool_id: Option<&str>) -> Result<Vec<OptimizationSuggestion>>;

    fn insert_feedback(&self, feedback: &Feedback) -> Result<()>;
    fn list_feedback(&self, invocation_id: Option<&str>) -> Result<Vec<Feedback>>;

    /// Replace the chain for `chain.tool_id`.
    fn set_fallback_chain(&self, chain: &FallbackChain) -> Result<()>;
    fn get_fallback_chain(&self, tool_id: &str) -> Result<Option<FallbackChain>>;
    fn list_fallback_chains(&self) -> Result<Vec<FallbackChain>>;

    /// Delete history rows older than `cutoff_ms`. Fallback chains are kept.
    fn prune_history(&self, cutoff_ms: u64) -> Result<PruneReport>;
}

/// A complete backend. Implemented for anything providing both halves.
pub trait Store: InvocationStore + HistoryStore {
    /// Snapshot of every table as one JSON document.
    fn export_json(&self) -> Result<serde_json::Value> {
        let mut doc = serde_json::Map::new();
        doc.insert("exported_at".into(), serde_json::Value::from(now_ms()));
        doc.insert("invocations".into(), serde_json::to_value(self.all_invocations()?)?);
        doc.insert("error_patterns".into(), serde_json::to_value(self.all_error_patterns()?)?);
        doc.insert("patterns".into(), serde_json::to_value(self.list_patterns()?)?);
        doc.insert("anti_patterns".into(), serde_json::to_value(self.list_anti_patterns()?)?);
        doc.insert("healing_actions".into(), serde_json::to_value(self.list_healing_actions(None)?)?);
        doc.insert("suggestions".into(), serde_json::to_value(self.list_suggestions(None)?)?);
        doc.insert("feedback".into(), serde_json::to_value(self.list_feedback(None)?)?);
        doc.insert("fallback_chains".into(), serde_json::to_value(self.list_fallback_chains()?)?);
        Ok(serde_json::Value::Object(doc))
    }
}

impl<T: InvocationStore + HistoryStore + ?Sized> Store for T {}
