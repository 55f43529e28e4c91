//! The analysis cycle: evaluate strategies against a tool's metrics, run the
//! triggered ones in priority order and record every outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::config::StrategyConfig;
use crate::error::{Result, ToolwatchError};
use crate::metrics::classify::{classify_error, ErrorType};
use crate::metrics::{MetricsEngine, ToolMetrics};
use crate::store::{PruneReport, Store};
use crate::types::{now_ms, InvocationRecord};

use super::handlers::{
    ActionHandler, ActionOutcome, ActionPayload, ActionRequest, LearningSample, SemanticSearch,
};
use super::optimize::{generate_optimizations, OptimizationFocus};
use super::registry::{default_definitions, StrategyRegistry};
use super::types::{
    ActionKind, AdaptiveStrategy, FallbackCandidate, FallbackChain, Feedback,
    OptimizationSuggestion, SelfHealingAction, StrategyDefinition,
};

/// Trigger label on healing actions started by low feedback ratings.
pub const FEEDBACK_TRIGGER: &str = "user-feedback";
/// Ratings at or below this start the learn path.
pub const LOW_RATING_THRESHOLD: u8 = 2;

/// True when the trigger fires and every guard condition holds.
pub fn should_trigger(strategy: &AdaptiveStrategy, metrics: &ToolMetrics) -> bool {
    strategy.trigger.fires(metrics) && strategy.conditions.iter().all(|c| c.holds(metrics))
}

fn summarize_failures(failures: &[InvocationRecord]) -> String {
    if failures.is_empty() {
        return "no recent failures".to_string();
    }
    let mut counts: BTreeMap<ErrorType, usize> = BTreeMap::new();
    for f in failures {
        *counts.entry(classify_error(f.error.as_deref().unwrap_or(""))).or_insert(0) += 1;
    }
    let mut ranked: Vec<(ErrorType, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let parts: Vec<String> = ranked.iter().map(|(t, n)| format!("{t} x{n}")).collect();
    let latest = failures[0].error.as_deref().unwrap_or("unknown error");
    format!(
        "{} recent failures ({}); latest: {latest}",
        failures.len(),
        parts.join(", ")
    )
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct AdaptiveEngineBuilder {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsEngine>,
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
    search: Option<Arc<dyn SemanticSearch>>,
    config: StrategyConfig,
}

impl AdaptiveEngineBuilder {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsEngine>) -> Self {
        Self {
            store,
            metrics,
            handlers: HashMap::new(),
            search: None,
            config: StrategyConfig::default(),
        }
    }

    /// Register the executor for `regenerate`, `learn` or `notify`.
    /// `optimize` and `fallback` are built in; handlers for them are ignored.
    pub fn handler(mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        if matches!(kind, ActionKind::Optimize | ActionKind::Fallback) {
            tracing::warn!(
                target: "toolwatch::strategy",
                action = %kind,
                "Ignoring handler for built-in action"
            );
            return self;
        }
        self.handlers.insert(kind, handler);
        self
    }

    pub fn search(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn config(mut self, config: StrategyConfig) -> Self {
        self.config = config;
        self
    }

    /// Register configured strategies, then seed the defaults into a still
    /// empty registry. Defaults whose action cannot run are added disabled.
    pub fn build(self) -> Result<AdaptiveEngine> {
        let engine = AdaptiveEngine {
            store: self.store,
            metrics: self.metrics,
            registry: RwLock::new(StrategyRegistry::new()),
            handlers: self.handlers,
            search: self.search,
            config: self.config,
            cycle_locks: Mutex::new(HashMap::new()),
        };

        for def in engine.config.definitions.clone() {
            engine.add_strategy(def)?;
        }
        if engine.registry()?.is_empty() && engine.config.seed_defaults {
            for mut def in default_definitions() {
                if !engine.can_execute(def.action.kind) {
                    tracing::warn!(
                        target: "toolwatch::strategy",
                        strategy = %def.name,
                        action = %def.action.kind,
                        "No executor for default strategy, registering it disabled"
                    );
                    def.enabled = false;
                }
                engine.add_strategy(def)?;
            }
        }

        tracing::info!(
            target: "toolwatch::strategy",
            strategies = engine.registry()?.len(),
            handlers = engine.handlers.len(),
            search = engine.search.is_some(),
            "Adaptive engine ready"
        );
        Ok(engine)
    }
}

// ---------------------------------------------------------------------------
// AdaptiveEngine
// ---------------------------------------------------------------------------

pub struct AdaptiveEngine {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsEngine>,
    registry: RwLock<StrategyRegistry>,
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
    search: Option<Arc<dyn SemanticSearch>>,
    config: StrategyConfig,
    /// Serializes analysis cycles per tool.
    cycle_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AdaptiveEngine {
    pub fn builder(store: Arc<dyn Store>, metrics: Arc<MetricsEngine>) -> AdaptiveEngineBuilder {
        AdaptiveEngineBuilder::new(store, metrics)
    }

    fn registry(&self) -> Result<RwLockReadGuard<'_, StrategyRegistry>> {
        self.registry
            .read()
            .map_err(|_| ToolwatchError::Internal("strategy registry lock poisoned".into()))
    }

    fn registry_mut(&self) -> Result<RwLockWriteGuard<'_, StrategyRegistry>> {
        self.registry
            .write()
            .map_err(|_| ToolwatchError::Internal("strategy registry lock poisoned".into()))
    }

    fn cycle_lock(&self, tool_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .cycle_locks
            .lock()
            .map_err(|_| ToolwatchError::Internal("cycle lock table poisoned".into()))?;
        Ok(locks.entry(tool_id.to_string()).or_default().clone())
    }

    /// Whether an action of `kind` has everything it needs to run.
    pub fn can_execute(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Optimize => true,
            ActionKind::Fallback => self.search.is_some(),
            ActionKind::Regenerate | ActionKind::Learn | ActionKind::Notify => {
                self.handlers.contains_key(&kind)
            }
        }
    }

    // -- Strategy management ------------------------------------------------

    /// Register a strategy. An enabled strategy whose action cannot run is
    /// rejected.
    pub fn add_strategy(&self, def: StrategyDefinition) -> Result<String> {
        if def.enabled && !self.can_execute(def.action.kind) {
            return Err(ToolwatchError::Validation(format!(
                "strategy '{}' uses action '{}' but no executor is configured for it",
                def.name, def.action.kind
            )));
        }
        let name = def.name.clone();
        let id = self.registry_mut()?.add(def)?;
        tracing::debug!(target: "toolwatch::strategy", id = %id, name = %name, "Strategy registered");
        Ok(id)
    }

    pub fn set_strategy_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut registry = self.registry_mut()?;
        let kind = registry
            .get(id)
            .map(|s| s.action.kind)
            .ok_or_else(|| ToolwatchError::Validation(format!("unknown strategy '{id}'")))?;
        if enabled && !self.can_execute(kind) {
            return Err(ToolwatchError::Validation(format!(
                "cannot enable strategy '{id}': no executor for action '{kind}'"
            )));
        }
        registry.set_enabled(id, enabled);
        Ok(())
    }

    /// All strategies in registration order.
    pub fn strategies(&self) -> Result<Vec<AdaptiveStrategy>> {
        Ok(self.registry()?.list().to_vec())
    }

    /// Enabled strategies that fire for `metrics`, ascending priority.
    pub fn triggered_strategies(&self, metrics: &ToolMetrics) -> Result<Vec<AdaptiveStrategy>> {
        let mut hits: Vec<AdaptiveStrategy> = self
            .registry()?
            .list()
            .iter()
            .filter(|s| s.enabled && should_trigger(s, metrics))
            .cloned()
            .collect();
        hits.sort_by_key(|s| s.priority);
        Ok(hits)
    }

    // -- Analysis cycle -----------------------------------------------------

    /// Run one analysis cycle for `tool_id`.
    ///
    /// Cycles for the same tool are serialized. Action failures are recorded
    /// on the returned healing actions, never returned as errors.
    pub async fn analyze_and_adapt(&self, tool_id: &str) -> Result<Vec<SelfHealingAction>> {
        let lock = self.cycle_lock(tool_id)?;
        let _cycle = lock.lock().await;

        let Some(metrics) = self.metrics.get_metrics(tool_id, false)? else {
            tracing::debug!(target: "toolwatch::strategy", tool_id, "No history, skipping analysis");
            return Ok(Vec::new());
        };

        let triggered = self.triggered_strategies(&metrics)?;
        let mut actions = Vec::with_capacity(triggered.len());
        for strategy in &triggered {
            actions.push(self.execute_strategy(strategy, &metrics).await?);
        }

        tracing::info!(
            target: "toolwatch::strategy",
            tool_id,
            triggered = triggered.len(),
            succeeded = actions.iter().filter(|a| a.success).count(),
            "Analysis cycle complete"
        );
        Ok(actions)
    }

    /// Execute one strategy's action and record the outcome.
    pub async fn execute_strategy(
        &self,
        strategy: &AdaptiveStrategy,
        metrics: &ToolMetrics,
    ) -> Result<SelfHealingAction> {
        let outcome = self
            .dispatch(strategy.action.kind, &strategy.name, &strategy.action.params, metrics, None)
            .await;
        let condition = strategy.trigger.describe();
        let action = self.record_action(
            &metrics.tool_id,
            Some(strategy.id.clone()),
            &strategy.name,
            Some(&condition),
            strategy.action.kind,
            outcome,
        )?;
        self.registry_mut()?.mark_triggered(&strategy.id, action.timestamp);
        Ok(action)
    }

    /// Suggestions for `metrics` without persisting them.
    pub fn generate_optimizations(
        &self,
        tool_id: &str,
        metrics: &ToolMetrics,
        focus: Option<OptimizationFocus>,
    ) -> Vec<OptimizationSuggestion> {
        generate_optimizations(tool_id, metrics, focus)
    }

    fn record_action(
        &self,
        tool_id: &str,
        strategy_id: Option<String>,
        trigger: &str,
        condition: Option<&str>,
        kind: ActionKind,
        outcome: Result<ActionOutcome>,
    ) -> Result<SelfHealingAction> {
        let (success, mut details, based_on, error_kind) = match outcome {
            Ok(o) => (true, o.details, o.based_on, None),
            Err(e) => (false, format!("Failed: {e}"), Vec::new(), Some(e.kind())),
        };
        if let Some(condition) = condition {
            details = format!("{details} [{condition}]");
        }
        let action = SelfHealingAction {
            id: uuid::Uuid::new_v4().to_string(),
            tool_id: tool_id.to_string(),
            strategy_id,
            trigger: trigger.to_string(),
            action: kind,
            success,
            details,
            impact: kind.impact(),
            based_on,
            timestamp: now_ms(),
        };
        self.store.insert_healing_action(&action)?;

        if action.success {
            tracing::info!(
                target: "toolwatch::strategy",
                tool_id,
                trigger,
                action = %kind,
                "Healing action succeeded"
            );
        } else {
            tracing::warn!(
                target: "toolwatch::strategy",
                tool_id,
                trigger,
                action = %kind,
                error_kind = error_kind.unwrap_or("unknown"),
                details = %action.details,
                "Healing action failed"
            );
        }
        Ok(action)
    }

    // -- Action execution ---------------------------------------------------

    async fn dispatch(
        &self,
        kind: ActionKind,
        trigger: &str,
        params: &serde_json::Value,
        metrics: &ToolMetrics,
        feedback: Option<&Feedback>,
    ) -> Result<ActionOutcome> {
        match kind {
            ActionKind::Optimize => self.run_optimize(params, metrics),
            ActionKind::Fallback => self.run_fallback(trigger, metrics).await,
            ActionKind::Regenerate => {
                let failures = self.recent_failures(&metrics.tool_id)?;
                let anti_patterns: Vec<_> = self
                    .store
                    .list_anti_patterns()?
                    .into_iter()
                    .filter(|a| a.tools.iter().any(|t| t == &metrics.tool_name))
                    .collect();
                let mut based_on: Vec<String> = failures.iter().map(|f| f.id.clone()).collect();
                based_on.extend(anti_patterns.iter().map(|a| a.id.clone()));
                let payload = ActionPayload::Regenerate {
                    failure_summary: summarize_failures(&failures),
                    recent_failures: failures,
                    anti_patterns,
                };
                self.call_handler(kind, trigger, params, metrics, payload, based_on).await
            }
            ActionKind::Learn => {
                let samples: Vec<LearningSample> = self
                    .store
                    .invocations_for_tool(&metrics.tool_id)?
                    .iter()
                    .rev()
                    .take(self.config.learning_sample_limit)
                    .map(LearningSample::from)
                    .collect();
                let based_on = match feedback {
                    Some(f) => vec![f.id.clone(), f.invocation_id.clone()],
                    None => samples.iter().map(|s| s.invocation_id.clone()).collect(),
                };
                let payload = ActionPayload::Learn { samples, feedback: feedback.cloned() };
                self.call_handler(kind, trigger, params, metrics, payload, based_on).await
            }
            ActionKind::Notify => {
                let payload = ActionPayload::Notify {
                    message: format!("{trigger} fired for {}: {metrics}", metrics.tool_name),
                    metrics: Box::new(metrics.clone()),
                };
                self.call_handler(kind, trigger, params, metrics, payload, Vec::new()).await
            }
        }
    }

    async fn call_handler(
        &self,
        kind: ActionKind,
        trigger: &str,
        params: &serde_json::Value,
        metrics: &ToolMetrics,
        payload: ActionPayload,
        based_on: Vec<String>,
    ) -> Result<ActionOutcome> {
        let handler = self
            .handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ToolwatchError::Action(format!("no handler registered for '{kind}'")))?;
        let request = ActionRequest {
            kind,
            tool_id: metrics.tool_id.clone(),
            tool_name: metrics.tool_name.clone(),
            trigger: trigger.to_string(),
            params: params.clone(),
            payload,
        };
        let mut outcome = handler.handle(request).await?;
        outcome.based_on = [based_on, outcome.based_on].concat();
        Ok(outcome)
    }

    /// Most recent failures first.
    fn recent_failures(&self, tool_id: &str) -> Result<Vec<InvocationRecord>> {
        Ok(self
            .store
            .invocations_for_tool(tool_id)?
            .into_iter()
            .rev()
            .filter(|r| !r.success)
            .take(self.config.recent_failure_limit)
            .collect())
    }

    fn run_optimize(&self, params: &serde_json::Value, metrics: &ToolMetrics) -> Result<ActionOutcome> {
        let focus = OptimizationFocus::from_params(params);
        let suggestions = generate_optimizations(&metrics.tool_id, metrics, focus);
        for s in &suggestions {
            self.store.insert_suggestion(s)?;
        }
        let details = if suggestions.is_empty() {
            "No optimization opportunities found".to_string()
        } else {
            let titles: Vec<&str> = suggestions.iter().map(|s| s.title.as_str()).collect();
            format!(
                "Generated {} optimization suggestion(s): {}",
                suggestions.len(),
                titles.join("; ")
            )
        };
        Ok(ActionOutcome {
            details,
            based_on: suggestions.iter().map(|s| s.id.clone()).collect(),
        })
    }

    async fn run_fallback(&self, trigger: &str, metrics: &ToolMetrics) -> Result<ActionOutcome> {
        let search = self
            .search
            .clone()
            .ok_or_else(|| ToolwatchError::Search("no semantic search configured".into()))?;
        let k = self.config.fallback_candidates;
        let vector = search.embed(&metrics.tool_name).await?;
        let fallbacks: Vec<FallbackCandidate> = search
            .search(&vector, k + 1)
            .await?
            .into_iter()
            .filter(|hit| hit.id != metrics.tool_id)
            .take(k)
            .map(|hit| FallbackCandidate { tool_id: hit.id, score: hit.score })
            .collect();
        if fallbacks.is_empty() {
            return Err(ToolwatchError::Search(format!(
                "no alternative tools found for '{}'",
                metrics.tool_id
            )));
        }

        let chain = FallbackChain {
            tool_id: metrics.tool_id.clone(),
            fallbacks,
            reason: trigger.to_string(),
            created_at: now_ms(),
        };
        self.store.set_fallback_chain(&chain)?;
        let ids: Vec<String> = chain.fallbacks.iter().map(|c| c.tool_id.clone()).collect();
        Ok(ActionOutcome {
            details: format!("Registered fallback chain for {}: {}", metrics.tool_id, ids.join(", ")),
            based_on: ids,
        })
    }

    // -- Feedback -----------------------------------------------------------

    /// Store `feedback`. A rating of 2 or lower immediately runs the learn
    /// action for the rated invocation's tool when a learn handler is
    /// registered; otherwise the feedback is only stored.
    pub async fn record_feedback(&self, feedback: Feedback) -> Result<Option<SelfHealingAction>> {
        if !(1..=5).contains(&feedback.rating) {
            return Err(ToolwatchError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                feedback.rating
            )));
        }
        self.store.insert_feedback(&feedback)?;
        if feedback.rating > LOW_RATING_THRESHOLD {
            return Ok(None);
        }
        if !self.can_execute(ActionKind::Learn) {
            tracing::warn!(
                target: "toolwatch::strategy",
                invocation_id = %feedback.invocation_id,
                rating = feedback.rating,
                "Low rating stored, no learn handler registered"
            );
            return Ok(None);
        }

        let Some(invocation) = self.store.get_invocation(&feedback.invocation_id)? else {
            tracing::warn!(
                target: "toolwatch::strategy",
                invocation_id = %feedback.invocation_id,
                "Low rating for unknown invocation, nothing to learn from"
            );
            return Ok(None);
        };

        let lock = self.cycle_lock(&invocation.tool_id)?;
        let _cycle = lock.lock().await;
        let metrics = self
            .metrics
            .get_metrics(&invocation.tool_id, false)?
            .unwrap_or_else(|| ToolMetrics::empty(&invocation.tool_id));
        let outcome = self
            .dispatch(ActionKind::Learn, FEEDBACK_TRIGGER, &serde_json::Value::Null, &metrics, Some(&feedback))
            .await;
        let action = self.record_action(
            &invocation.tool_id,
            None,
            FEEDBACK_TRIGGER,
            None,
            ActionKind::Learn,
            outcome,
        )?;
        Ok(Some(action))
    }

    // -- History ------------------------------------------------------------

    pub fn suggestions(&self, tool_id: Option<&str>) -> Result<Vec<OptimizationSuggestion>> {
        self.store.list_suggestions(tool_id)
    }

    pub fn healing_history(&self, tool_id: Option<&str>) -> Result<Vec<SelfHealingAction>> {
        self.store.list_healing_actions(tool_id)
    }

    pub fn fallback_chain(&self, tool_id: &str) -> Result<Option<FallbackChain>> {
        self.store.get_fallback_chain(tool_id)
    }

    /// Delete history older than `older_than`. Fallback chains are kept.
    pub fn cleanup_history(&self, older_than: Duration) -> Result<PruneReport> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as u64);
        let report = self.store.prune_history(cutoff)?;
        tracing::info!(
            target: "toolwatch::strategy",
            cutoff,
            removed = report.total(),
            "Strategy history cleaned up"
        );
        Ok(report)
    }
}
