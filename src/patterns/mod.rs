//! # Stage: Pattern Miner
//!
//! ## Responsibility
//! Mines raw invocation history for recurring usage shapes. Four independent
//! passes run over the same input slice:
//!
//! 1. **Sequences**: contiguous tool windows (2..4) within a session.
//! 2. **Combinations**: the unordered tool set used by a whole session.
//! 3. **Success patterns**: single tools that are fast and almost never fail.
//! 4. **Anti-patterns**: tools failing repeatedly inside the same session.
//!
//! Patterns and anti-patterns are persisted to the [`HistoryStore`], and
//! [`PatternMiner::get_recommendations`] ranks stored patterns against the
//! tools a caller is currently using.
//!
//! ## Guarantees
//! - Pure passes: mining reads only its input; the single side effect is the
//!   final upsert of retained patterns and anti-patterns
//! - Retention: no pattern with `support < 3` or `confidence < 0.7`, and no
//!   anti-pattern with `occurrences < 3`, ever leaves [`PatternMiner::discover`]
//!   or reaches the store
//! - Deterministic ids: rediscovery updates a pattern in place
//!
//! ## NOT Responsible For
//! - Free-text or embedding-based pattern lookup (external search service)
//! - Acting on anti-patterns (the strategy engine reads them)
//!
//! [`HistoryStore`]: crate::store::HistoryStore

pub mod mining;
pub mod recommend;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::classify::ExampleRing;
use crate::store::Store;
use crate::types::{now_ms, Impact, InvocationRecord};

pub use recommend::{PatternRecommendation, RecommendationContext};

// ---------------------------------------------------------------------------
// DiscoveredPattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Ordered tool window inside a session.
    Sequence,
    /// Unordered set of tools used together in a session.
    Combination,
    /// A single tool with a strong success record.
    SuccessPattern,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Sequence => write!(f, "sequence"),
            PatternKind::Combination => write!(f, "combination"),
            PatternKind::SuccessPattern => write!(f, "success"),
        }
    }
}

/// Observed results of the occurrences backing a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternOutcomes {
    /// Fraction 0–1.
    pub success_rate: f64,
    /// Mean duration in ms of the invocations backing the pattern.
    pub avg_latency: f64,
    pub reliability: f64,
    pub impact: Impact,
}

impl PatternOutcomes {
    /// `reliability = success_rate * 0.7 + min(support / 20, 1) * 0.3`.
    pub fn derive(success_rate: f64, avg_latency: f64, support: u64) -> Self {
        let volume = (support as f64 / 20.0).min(1.0);
        let impact = if success_rate > 0.9 && support > 10 {
            Impact::High
        } else if success_rate > 0.8 && support > 5 {
            Impact::Medium
        } else {
            Impact::Low
        };
        Self {
            success_rate,
            avg_latency,
            reliability: success_rate * 0.7 + volume * 0.3,
            impact,
        }
    }
}

/// A mined positive regularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPattern {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    /// Ordered for sequences, sorted for combinations.
    pub tools: Vec<String>,
    /// Successful occurrences / total occurrences.
    pub confidence: f64,
    /// Number of occurrences backing the pattern.
    pub support: u64,
    /// Raw number of times the shape was observed.
    pub frequency: u64,
    pub outcomes: PatternOutcomes,
    pub discovered: u64,
    pub last_seen: u64,
}

impl DiscoveredPattern {
    /// Stable id derived from the kind and the joined tool key.
    pub fn make_id(kind: PatternKind, key: &str) -> String {
        format!("{kind}:{key}")
    }
}

// ---------------------------------------------------------------------------
// AntiPattern
// ---------------------------------------------------------------------------

/// A mined recurring failure shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPattern {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Number of sessions exhibiting the shape.
    pub occurrences: u64,
    pub impact: Impact,
    pub tools: Vec<String>,
    /// Distinct error strings, first-seen order.
    pub symptoms: Vec<String>,
    pub remediation: String,
    /// Most recent session ids.
    pub examples: ExampleRing,
    pub last_seen: u64,
}

/// Sort anti-patterns by `occurrences` desc, then impact desc.
pub fn rank_anti_patterns(items: &mut [AntiPattern]) {
    items.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then(b.impact.cmp(&a.impact))
            .then(a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// PatternMiner
// ---------------------------------------------------------------------------

/// Runs the mining passes and owns pattern persistence.
pub struct PatternMiner {
    store: Arc<dyn Store>,
}

impl PatternMiner {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Mine `invocations`, persist what survives the retention rules and
    /// return the discovered positive patterns.
    ///
    /// Anti-patterns are persisted as a side effect; read them back with
    /// [`PatternMiner::get_anti_patterns`].
    pub fn discover(&self, invocations: &[InvocationRecord]) -> Result<Vec<DiscoveredPattern>> {
        let now = now_ms();
        let sessions = mining::group_by_session(invocations);

        let mut found = mining::mine_sequences(&sessions, now);
        found.extend(mining::mine_combinations(&sessions, now));
        found.extend(mining::mine_success_patterns(invocations, now));
        let anti = mining::mine_anti_patterns(&sessions);

        for pattern in found.iter_mut() {
            if let Some(existing) = self.store.get_pattern(&pattern.id)? {
                pattern.discovered = existing.discovered;
            }
            self.store.upsert_pattern(pattern)?;
        }
        for item in &anti {
            self.store.upsert_anti_pattern(item)?;
        }

        tracing::info!(
            target: "toolwatch::patterns",
            invocations = invocations.len(),
            sessions = sessions.len(),
            patterns = found.len(),
            anti_patterns = anti.len(),
            "Pattern discovery complete"
        );
        Ok(found)
    }

    /// Mine the stored history, optionally limited to records at or after
    /// `since_ms`.
    pub fn discover_from_store(&self, since_ms: Option<u64>) -> Result<Vec<DiscoveredPattern>> {
        let history = match since_ms {
            Some(ts) => self.store.invocations_since(ts)?,
            None => self.store.all_invocations()?,
        };
        self.discover(&history)
    }

    /// Rank stored patterns against the caller's current tool set.
    pub fn get_recommendations(
        &self,
        context: &RecommendationContext,
        current_tools: &[String],
        limit: usize,
    ) -> Result<Vec<PatternRecommendation>> {
        let stored = self.store.list_patterns()?;
        Ok(recommend::rank(stored, context, current_tools, limit))
    }

    /// All stored anti-patterns, most frequent first.
    pub fn get_anti_patterns(&self) -> Result<Vec<AntiPattern>> {
        let mut items = self.store.list_anti_patterns()?;
        rank_anti_patterns(&mut items);
        Ok(items)
    }

    /// Stored anti-patterns involving `tool_name`.
    pub fn anti_patterns_for_tool(&self, tool_name: &str) -> Result<Vec<AntiPattern>> {
        let mut items: Vec<AntiPattern> = self
            .store
            .list_anti_patterns()?
            .into_iter()
            .filter(|a| a.tools.iter().any(|t| t == tool_name))
            .collect();
        rank_anti_patterns(&mut items);
        Ok(items)
    }
}
