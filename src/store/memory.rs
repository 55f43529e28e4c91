//! Process-local store. All tables sit behind one `RwLock`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, ToolwatchError};
use crate::metrics::classify::{ErrorPattern, ErrorType};
use crate::patterns::{AntiPattern, DiscoveredPattern};
use crate::strategy::types::{FallbackChain, Feedback, OptimizationSuggestion, SelfHealingAction};
use crate::types::InvocationRecord;

use super::{HistoryStore, InvocationStore, PruneReport};

#[derive(Default)]
struct Tables {
    /// Insertion order.
    invocations: Vec<InvocationRecord>,
    ids: HashSet<String>,
    error_patterns: BTreeMap<(String, ErrorType), ErrorPattern>,
    patterns: BTreeMap<String, DiscoveredPattern>,
    anti_patterns: BTreeMap<String, AntiPattern>,
    healing_actions: Vec<SelfHealingAction>,
    suggestions: Vec<OptimizationSuggestion>,
    feedback: Vec<Feedback>,
    fallback_chains: BTreeMap<String, FallbackChain>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| ToolwatchError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ToolwatchError::Internal("memory store lock poisoned".into()))
    }

    fn select<F>(&self, keep: F) -> Result<Vec<InvocationRecord>>
    where
        F: Fn(&InvocationRecord) -> bool,
    {
        let t = self.read()?;
        let mut out: Vec<InvocationRecord> = t.invocations.iter().filter(|r| keep(r)).cloned().collect();
        // Stable: equal timestamps keep insertion order.
        out.sort_by_key(|r| r.timestamp);
        Ok(out)
    }
}

impl InvocationStore for MemoryStore {
    fn append(&self, record: &InvocationRecord) -> Result<()> {
        let mut t = self.write()?;
        if !t.ids.insert(record.id.clone()) {
            return Err(ToolwatchError::Validation(format!(
                "duplicate invocation id '{}'",
                record.id
            )));
        }
        t.invocations.push(record.clone());
        Ok(())
    }

    fn get_invocation(&self, id: &str) -> Result<Option<InvocationRecord>> {
        let t = self.read()?;
        Ok(t.invocations.iter().find(|r| r.id == id).cloned())
    }

    fn invocations_for_tool(&self, tool_id: &str) -> Result<Vec<InvocationRecord>> {
        self.select(|r| r.tool_id == tool_id)
    }

    fn recent_invocations_for_tool(&self, tool_id: &str, limit: usize) -> Result<Vec<InvocationRecord>> {
        let mut all = self.invocations_for_tool(tool_id)?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    fn invocations_for_session(&self, session_id: &str) -> Result<Vec<InvocationRecord>> {
        self.select(|r| r.session_id() == Some(session_id))
    }

    fn invocations_since(&self, since_ms: u64) -> Result<Vec<InvocationRecord>> {
        self.select(|r| r.timestamp >= since_ms)
    }

    fn all_invocations(&self) -> Result<Vec<InvocationRecord>> {
        self.select(|_| true)
    }

    fn tool_ids(&self) -> Result<Vec<String>> {
        let t = self.read()?;
        let ids: std::collections::BTreeSet<&str> =
            t.invocations.iter().map(|r| r.tool_id.as_str()).collect();
        Ok(ids.into_iter().map(str::to_string).collect())
    }

    fn delete_invocations_before(&self, cutoff_ms: u64) -> Result<usize> {
        let mut t = self.write()?;
        let before = t.invocations.len();
        let (keep, removed): (Vec<_>, Vec<_>) =
            std::mem::take(&mut t.invocations).into_iter().partition(|r| r.timestamp >= cutoff_ms);
        for r in &removed {
            t.ids.remove(&r.id);
        }
        t.invocations = keep;
        Ok(before - t.invocations.len())
    }

    fn record_error(
        &self,
        tool_id: &str,
        error_type: ErrorType,
        invocation_id: &str,
        at_ms: u64,
    ) -> Result<()> {
        let mut t = self.write()?;
        t.error_patterns
            .entry((tool_id.to_string(), error_type))
            .or_insert_with(|| ErrorPattern::new(tool_id, error_type, at_ms))
            .observe(invocation_id, at_ms);
        Ok(())
    }

    fn error_patterns_for_tool(&self, tool_id: &str) -> Result<Vec<ErrorPattern>> {
        let t = self.read()?;
        Ok(t.error_patterns.values().filter(|p| p.tool_id == tool_id).cloned().collect())
    }

    fn all_error_patterns(&self) -> Result<Vec<ErrorPattern>> {
        Ok(self.read()?.error_patterns.values().cloned().collect())
    }

    fn delete_error_patterns_before(&self, cutoff_ms: u64) -> Result<usize> {
        let mut t = self.write()?;
        let before = t.error_patterns.len();
        t.error_patterns.retain(|_, p| p.last_seen >= cutoff_ms);
        Ok(before - t.error_patterns.len())
    }
}

impl HistoryStore for MemoryStore {
    fn upsert_pattern(&self, pattern: &DiscoveredPattern) -> Result<()> {
        self.write()?.patterns.insert(pattern.id.clone(), pattern.clone());
        Ok(())
    }

    fn get_pattern(&self, id: &str) -> Result<Option<DiscoveredPattern>> {
        Ok(self.read()?.patterns.get(id).cloned())
    }

    fn list_patterns(&self) -> Result<Vec<DiscoveredPattern>> {
        Ok(self.read()?.patterns.values().cloned().collect())
    }

    fn upsert_anti_pattern(&self, anti_pattern: &AntiPattern) -> Result<()> {
        self.write()?
            .anti_patterns
            .insert(anti_pattern.id.clone(), anti_pattern.clone());
        Ok(())
    }

    fn list_anti_patterns(&self) -> Result<Vec<AntiPattern>> {
        Ok(self.read()?.anti_patterns.values().cloned().collect())
    }

    fn insert_healing_action(&self, action: &SelfHealingAction) -> Result<()> {
        self.write()?.healing_actions.push(action.clone());
        Ok(())
    }

    fn list_healing_actions(&self, tool_id: Option<&str>) -> Result<Vec<SelfHealingAction>> {
        let t = self.read()?;
        Ok(t.healing_actions
            .iter()
            .filter(|a| tool_id.map_or(true, |id| a.tool_id == id))
            .cloned()
            .collect())
    }

    fn insert_suggestion(&self, suggestion: &OptimizationSuggestion) -> Result<()> {
        self.write()?.suggestions.push(suggestion.clone());
        Ok(())
    }

    fn list_suggestions(&self, tool_id: Option<&str>) -> Result<Vec<OptimizationSuggestion>> {
        let t = self.read()?;
        Ok(t.suggestions
            .iter()
            .filter(|s| tool_id.map_or(true, |id| s.tool_id == id))
            .cloned()
            .collect())
    }

    fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.write()?.feedback.push(feedback.clone());
        Ok(())
    }

    fn list_feedback(&self, invocation_id: Option<&str>) -> Result<Vec<Feedback>> {
        let t = self.read()?;
        Ok(t.feedback
            .iter()
            .filter(|f| invocation_id.map_or(true, |id| f.invocation_id == id))
            .cloned()
            .collect())
    }

    fn set_fallback_chain(&self, chain: &FallbackChain) -> Result<()> {
        self.write()?.fallback_chains.insert(chain.tool_id.clone(), chain.clone());
        Ok(())
    }

    fn get_fallback_chain(&self, tool_id: &str) -> Result<Option<FallbackChain>> {
        Ok(self.read()?.fallback_chains.get(tool_id).cloned())
    }

    fn list_fallback_chains(&self) -> Result<Vec<FallbackChain>> {
        Ok(self.read()?.fallback_chains.values().cloned().collect())
    }

    fn prune_history(&self, cutoff_ms: u64) -> Result<PruneReport> {
        let mut t = self.write()?;
        let mut report = PruneReport::default();

        let n = t.patterns.len();
        t.patterns.retain(|_, p| p.last_seen >= cutoff_ms);
        report.patterns = n - t.patterns.len();

        let n = t.anti_patterns.len();
        t.anti_patterns.retain(|_, a| a.last_seen >= cutoff_ms);
        report.anti_patterns = n - t.anti_patterns.len();

        let n = t.healing_actions.len();
        t.healing_actions.retain(|a| a.timestamp >= cutoff_ms);
        report.healing_actions = n - t.healing_actions.len();

        let n = t.suggestions.len();
        t.suggestions.retain(|s| s.created_at >= cutoff_ms);
        report.suggestions = n - t.suggestions.len();

        let n = t.feedback.len();
        t.feedback.retain(|f| f.timestamp >= cutoff_ms);
        report.feedback = n - t.feedback.len();

        Ok(report)
    }
}
