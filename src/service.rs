//! # Stage: Toolwatch facade
//!
//! ## Responsibility
//! Wires one store, the metrics engine, the pattern miner and the adaptive
//! engine together behind a single handle. Most callers only ever touch
//! [`Toolwatch`].
//!
//! ## Guarantees
//! - All components share the same store instance
//! - Configuration is validated once, at [`ToolwatchBuilder::build`]
//!
//! ## NOT Responsible For
//! - Installing a tracing subscriber (call [`crate::logging::init`])
//! - Scheduling periodic analysis or cleanup (the host decides when)
//!
//! # Example
//!
//! ```rust,no_run
//! use toolwatch::{Config, InvocationRecord, Toolwatch};
//!
//! # async fn demo() -> toolwatch::Result<()> {
//! let tw = Toolwatch::builder(Config::default()).build()?;
//! tw.record(&InvocationRecord::failure("search", 120, "Request timeout"))?;
//! let actions = tw.analyze_and_adapt("search").await?;
//! println!("{} healing actions", actions.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::stats::BucketMetrics;
use crate::metrics::{MetricsEngine, ToolMetrics};
use crate::patterns::{
    AntiPattern, DiscoveredPattern, PatternMiner, PatternRecommendation, RecommendationContext,
};
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{PruneReport, Store};
use crate::strategy::handlers::{ActionHandler, SemanticSearch};
use crate::strategy::optimize::OptimizationFocus;
use crate::strategy::types::{
    ActionKind, AdaptiveStrategy, FallbackChain, Feedback, OptimizationSuggestion,
    SelfHealingAction, StrategyDefinition,
};
use crate::strategy::AdaptiveEngine;
use crate::types::InvocationRecord;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct ToolwatchBuilder {
    config: Config,
    store: Option<Arc<dyn Store>>,
    handlers: Vec<(ActionKind, Arc<dyn ActionHandler>)>,
    search: Option<Arc<dyn SemanticSearch>>,
}

impl ToolwatchBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, store: None, handlers: Vec::new(), search: None }
    }

    /// Use `store` instead of the one named by the config.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handler(mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.push((kind, handler));
        self
    }

    pub fn search(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn build(self) -> Result<Toolwatch> {
        let store: Arc<dyn Store> = match (self.store, &self.config.store.path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(SqliteStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let metrics = Arc::new(MetricsEngine::with_ttl(store.clone(), self.config.metrics.cache_ttl()));
        let miner = PatternMiner::new(store.clone());

        let mut engine = AdaptiveEngine::builder(store.clone(), metrics.clone())
            .config(self.config.strategy.clone());
        for (kind, handler) in self.handlers {
            engine = engine.handler(kind, handler);
        }
        if let Some(search) = self.search {
            engine = engine.search(search);
        }
        let engine = engine.build()?;

        Ok(Toolwatch { config: self.config, store, metrics, miner, engine })
    }
}

// ---------------------------------------------------------------------------
// Toolwatch
// ---------------------------------------------------------------------------

pub struct Toolwatch {
    config: Config,
    store: Arc<dyn Store>,
    metrics: Arc<MetricsEngine>,
    miner: PatternMiner,
    engine: AdaptiveEngine,
}

impl Toolwatch {
    pub fn builder(config: Config) -> ToolwatchBuilder {
        ToolwatchBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn metrics_engine(&self) -> &MetricsEngine {
        &self.metrics
    }

    pub fn miner(&self) -> &PatternMiner {
        &self.miner
    }

    pub fn engine(&self) -> &AdaptiveEngine {
        &self.engine
    }

    // -- Metrics ------------------------------------------------------------

    pub fn record(&self, invocation: &InvocationRecord) -> Result<()> {
        self.metrics.record(invocation)
    }

    pub fn metrics(&self, tool_id: &str) -> Result<Option<ToolMetrics>> {
        self.metrics.get_metrics(tool_id, false)
    }

    pub fn all_metrics(&self) -> Result<Vec<ToolMetrics>> {
        self.metrics.get_all_metrics()
    }

    pub fn trends(&self, tool_id: &str, interval: Duration) -> Result<Vec<BucketMetrics>> {
        self.metrics.get_trends(tool_id, interval.as_millis() as u64)
    }

    pub fn cleanup_invocations(&self, older_than: Duration) -> Result<usize> {
        self.metrics.cleanup(older_than)
    }

    // -- Patterns -----------------------------------------------------------

    /// Mine the full stored history.
    pub fn discover(&self) -> Result<Vec<DiscoveredPattern>> {
        self.miner.discover_from_store(None)
    }

    /// Mine only records at or after `since_ms`.
    pub fn discover_recent(&self, since_ms: u64) -> Result<Vec<DiscoveredPattern>> {
        self.miner.discover_from_store(Some(since_ms))
    }

    pub fn recommendations(
        &self,
        context: &RecommendationContext,
        current_tools: &[String],
        limit: usize,
    ) -> Result<Vec<PatternRecommendation>> {
        self.miner.get_recommendations(context, current_tools, limit)
    }

    pub fn anti_patterns(&self) -> Result<Vec<AntiPattern>> {
        self.miner.get_anti_patterns()
    }

    // -- Strategies ---------------------------------------------------------

    pub async fn analyze_and_adapt(&self, tool_id: &str) -> Result<Vec<SelfHealingAction>> {
        self.engine.analyze_and_adapt(tool_id).await
    }

    /// One cycle per tool with history, busiest tool first.
    pub async fn analyze_all(&self) -> Result<Vec<SelfHealingAction>> {
        let mut actions = Vec::new();
        for m in self.metrics.get_all_metrics()? {
            actions.extend(self.engine.analyze_and_adapt(&m.tool_id).await?);
        }
        Ok(actions)
    }

    pub async fn record_feedback(&self, feedback: Feedback) -> Result<Option<SelfHealingAction>> {
        self.engine.record_feedback(feedback).await
    }

    pub fn add_strategy(&self, def: StrategyDefinition) -> Result<String> {
        self.engine.add_strategy(def)
    }

    pub fn set_strategy_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.engine.set_strategy_enabled(id, enabled)
    }

    pub fn strategies(&self) -> Result<Vec<AdaptiveStrategy>> {
        self.engine.strategies()
    }

    /// Fresh suggestions for `tool_id`, not persisted. `None` for unknown tools.
    pub fn optimizations(
        &self,
        tool_id: &str,
        focus: Option<OptimizationFocus>,
    ) -> Result<Option<Vec<OptimizationSuggestion>>> {
        Ok(self
            .metrics
            .get_metrics(tool_id, false)?
            .map(|m| self.engine.generate_optimizations(tool_id, &m, focus)))
    }

    pub fn suggestions(&self, tool_id: Option<&str>) -> Result<Vec<OptimizationSuggestion>> {
        self.engine.suggestions(tool_id)
    }

    pub fn healing_history(&self, tool_id: Option<&str>) -> Result<Vec<SelfHealingAction>> {
        self.engine.healing_history(tool_id)
    }

    pub fn fallback_chain(&self, tool_id: &str) -> Result<Option<FallbackChain>> {
        self.engine.fallback_chain(tool_id)
    }

    pub fn cleanup_history(&self, older_than: Duration) -> Result<PruneReport> {
        self.engine.cleanup_history(older_than)
    }

    // -- Export -------------------------------------------------------------

    /// Write every table to `path` as pretty-printed JSON.
    pub fn export_data(&self, path: impl AsRef<Path>) -> Result<()> {
        let doc = self.store.export_json()?;
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&doc)?)?;
        tracing::info!(
            target: "toolwatch::service",
            path = %path.as_ref().display(),
            "Exported data"
        );
        Ok(())
    }
}
