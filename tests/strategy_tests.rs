//! Tests for the adaptive strategy engine: trigger evaluation, priority
//! ordering, failure isolation, feedback learning, fallback chains and
//! per-tool serialization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use toolwatch::config::StrategyConfig;
use toolwatch::store::memory::MemoryStore;
use toolwatch::store::{HistoryStore, Store};
use toolwatch::strategy::handlers::{ActionPayload, SearchHit};
use toolwatch::strategy::types::{Direction, MetricField, StrategyAction, StrategyKind, Trigger};
use toolwatch::strategy::*;
use toolwatch::{InvocationRecord, MetricsEngine, Result, ToolwatchError};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<ActionRequest>>,
    fail: bool,
}

impl Recorder {
    fn failing() -> Self {
        Self { requests: Mutex::new(Vec::new()), fail: true }
    }

    fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionHandler for Recorder {
    async fn handle(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let kind = request.kind;
        self.requests.lock().unwrap().push(request);
        if self.fail {
            return Err(ToolwatchError::Action("model unavailable".into()));
        }
        Ok(ActionOutcome::new(format!("{kind} done")))
    }
}

struct FixedSearch {
    hits: Vec<&'static str>,
}

#[async_trait]
impl SemanticSearch for FixedSearch {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![text.len() as f32])
    }

    async fn search(&self, _vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        Ok(self
            .hits
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, id)| SearchHit { id: id.to_string(), score: 1.0 - i as f32 * 0.1 })
            .collect())
    }
}

/// Sleeps while tracking how many calls overlap.
#[derive(Default)]
struct SlowHandler {
    in_flight: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait]
impl ActionHandler for SlowHandler {
    async fn handle(&self, _request: ActionRequest) -> Result<ActionOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ActionOutcome::new("slow"))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Setup {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsEngine>,
    engine: AdaptiveEngine,
}

fn setup(
    config: StrategyConfig,
    handlers: Vec<(ActionKind, Arc<dyn ActionHandler>)>,
    search: Option<Arc<dyn SemanticSearch>>,
) -> Setup {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let metrics = Arc::new(MetricsEngine::new(store.clone()));
    let mut builder = AdaptiveEngine::builder(store.clone(), metrics.clone()).config(config);
    for (kind, h) in handlers {
        builder = builder.handler(kind, h);
    }
    if let Some(s) = search {
        builder = builder.search(s);
    }
    Setup { store, metrics, engine: builder.build().unwrap() }
}

fn custom(defs: Vec<StrategyDefinition>) -> StrategyConfig {
    StrategyConfig { seed_defaults: false, definitions: defs, ..StrategyConfig::default() }
}

/// Fires for any tool with history.
fn always(name: &str, kind: ActionKind, priority: u32) -> StrategyDefinition {
    StrategyDefinition {
        name: name.into(),
        kind: StrategyKind::Quality,
        trigger: Trigger::threshold(MetricField::TotalInvocations, 0.0, Direction::Above),
        action: StrategyAction::new(kind),
        enabled: true,
        priority,
        conditions: vec![],
    }
}

/// `ok` successes at 100ms and `failed` timeouts.
fn load(metrics: &MetricsEngine, tool: &str, ok: usize, failed: usize) {
    for i in 0..ok {
        metrics.record(&InvocationRecord::success(tool, 100).with_timestamp(1_000 + i as u64)).unwrap();
    }
    for i in 0..failed {
        metrics
            .record(&InvocationRecord::failure(tool, 100, "Request timeout").with_timestamp(5_000 + i as u64))
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Default strategies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_high_failure_rate_triggers_regenerate() {
    let regen = Arc::new(Recorder::default());
    let s = setup(
        StrategyConfig::default(),
        vec![(ActionKind::Regenerate, regen.clone() as Arc<dyn ActionHandler>)],
        None,
    );
    load(&s.metrics, "search", 13, 7);

    let actions = s.engine.analyze_and_adapt("search").await.unwrap();
    assert_eq!(actions.len(), 1);
    let a = &actions[0];
    assert_eq!(a.action, ActionKind::Regenerate);
    assert!(a.success);
    assert_eq!(a.trigger, "Auto-regenerate on high failure rate");
    assert_eq!(a.impact, toolwatch::Impact::High);

    let reqs = regen.requests();
    assert_eq!(reqs.len(), 1);
    match &reqs[0].payload {
        ActionPayload::Regenerate { failure_summary, recent_failures, .. } => {
            assert_eq!(recent_failures.len(), 7);
            assert!(failure_summary.contains("timeout x7"));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(s.engine.healing_history(Some("search")).unwrap().len(), 1);
}

#[tokio::test]
async fn test_guard_condition_blocks_small_samples() {
    let regen = Arc::new(Recorder::default());
    let s = setup(
        StrategyConfig::default(),
        vec![(ActionKind::Regenerate, regen.clone() as Arc<dyn ActionHandler>)],
        None,
    );
    load(&s.metrics, "search", 3, 2);
    assert!(s.engine.analyze_and_adapt("search").await.unwrap().is_empty());
    assert!(regen.requests().is_empty());
}

#[tokio::test]
async fn test_recent_failures_are_capped() {
    let regen = Arc::new(Recorder::default());
    let config = StrategyConfig { recent_failure_limit: 4, ..StrategyConfig::default() };
    let s = setup(config, vec![(ActionKind::Regenerate, regen.clone() as Arc<dyn ActionHandler>)], None);
    load(&s.metrics, "search", 5, 15);
    s.engine.analyze_and_adapt("search").await.unwrap();
    match &regen.requests()[0].payload {
        ActionPayload::Regenerate { recent_failures, .. } => assert_eq!(recent_failures.len(), 4),
        other => panic!("unexpected payload {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Ordering and isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_triggered_strategies_run_in_priority_order() {
    let rec = Arc::new(Recorder::default());
    let h = rec.clone() as Arc<dyn ActionHandler>;
    let s = setup(
        custom(vec![
            always("third", ActionKind::Notify, 30),
            always("first", ActionKind::Learn, 10),
            always("second", ActionKind::Notify, 20),
        ]),
        vec![(ActionKind::Notify, h.clone()), (ActionKind::Learn, h)],
        None,
    );
    load(&s.metrics, "t", 5, 0);

    let actions = s.engine.analyze_and_adapt("t").await.unwrap();
    let order: Vec<&str> = actions.iter().map(|a| a.trigger.as_str()).collect();
    assert_eq!(order, vec!["first", "second", "third"]);
    let seen: Vec<String> = rec.requests().into_iter().map(|r| r.trigger).collect();
    assert_eq!(seen, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_failed_action_is_recorded_and_does_not_stop_cycle() {
    let bad = Arc::new(Recorder::failing());
    let s = setup(
        custom(vec![always("regen", ActionKind::Regenerate, 1), always("optimize", ActionKind::Optimize, 2)]),
        vec![(ActionKind::Regenerate, bad as Arc<dyn ActionHandler>)],
        None,
    );
    load(&s.metrics, "t", 13, 7);

    let actions = s.engine.analyze_and_adapt("t").await.unwrap();
    assert_eq!(actions.len(), 2);
    assert!(!actions[0].success);
    assert!(actions[0].details.starts_with("Failed: "));
    assert!(actions[0].details.contains("model unavailable"));
    assert!(actions[0].details.ends_with("[total_invocations > 0]"));
    assert!(actions[1].success);
    assert!(actions[1].details.ends_with("[total_invocations > 0]"));

    // Reliability (65% < 90%) and error-handling suggestions were persisted.
    let suggestions = s.engine.suggestions(Some("t")).unwrap();
    assert_eq!(suggestions.len(), 2);
    assert_eq!(actions[1].based_on.len(), 2);
}

#[tokio::test]
async fn test_trigger_counts_are_tracked() {
    let s = setup(custom(vec![always("opt", ActionKind::Optimize, 1)]), vec![], None);
    load(&s.metrics, "t", 5, 0);
    s.engine.analyze_and_adapt("t").await.unwrap();
    s.engine.analyze_and_adapt("t").await.unwrap();
    let strategy = &s.engine.strategies().unwrap()[0];
    assert_eq!(strategy.trigger_count, 2);
    assert!(strategy.last_triggered.is_some());
}

#[tokio::test]
async fn test_disabled_strategy_never_runs() {
    let s = setup(custom(vec![always("opt", ActionKind::Optimize, 1)]), vec![], None);
    let id = s.engine.strategies().unwrap()[0].id.clone();
    s.engine.set_strategy_enabled(&id, false).unwrap();
    load(&s.metrics, "t", 5, 0);
    assert!(s.engine.analyze_and_adapt("t").await.unwrap().is_empty());
}

#[test]
fn test_enabled_strategy_without_handler_fails_build() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let metrics = Arc::new(MetricsEngine::new(store.clone()));
    let result = AdaptiveEngine::builder(store, metrics)
        .config(custom(vec![always("notify", ActionKind::Notify, 1)]))
        .build();
    assert!(matches!(result, Err(ToolwatchError::Validation(_))));
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fallback_registers_chain_without_self() {
    let search = Arc::new(FixedSearch { hits: vec!["search", "bing", "ddg", "brave", "kagi"] });
    let s = setup(
        custom(vec![always("fallback", ActionKind::Fallback, 1)]),
        vec![],
        Some(search as Arc<dyn SemanticSearch>),
    );
    load(&s.metrics, "search", 5, 0);

    let actions = s.engine.analyze_and_adapt("search").await.unwrap();
    assert!(actions[0].success);
    let chain = s.engine.fallback_chain("search").unwrap().unwrap();
    let ids: Vec<&str> = chain.fallbacks.iter().map(|c| c.tool_id.as_str()).collect();
    assert_eq!(ids, vec!["bing", "ddg", "brave"]);
    assert_eq!(chain.reason, "fallback");
}

#[tokio::test]
async fn test_fallback_without_alternatives_is_a_recorded_failure() {
    let search = Arc::new(FixedSearch { hits: vec!["search"] });
    let s = setup(
        custom(vec![always("fallback", ActionKind::Fallback, 1)]),
        vec![],
        Some(search as Arc<dyn SemanticSearch>),
    );
    load(&s.metrics, "search", 5, 0);
    let actions = s.engine.analyze_and_adapt("search").await.unwrap();
    assert!(!actions[0].success);
    assert!(actions[0].details.contains("no alternative tools"));
    assert!(s.engine.fallback_chain("search").unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_low_rating_triggers_learning() {
    let learn = Arc::new(Recorder::default());
    let s = setup(
        custom(vec![]),
        vec![(ActionKind::Learn, learn.clone() as Arc<dyn ActionHandler>)],
        None,
    );
    let inv = InvocationRecord::failure("search", 100, "bad answer");
    s.metrics.record(&inv).unwrap();

    let feedback = Feedback::new(inv.id.clone(), 1).with_issue("irrelevant results");
    let feedback_id = feedback.id.clone();
    let action = s.engine.record_feedback(feedback).await.unwrap().unwrap();
    assert_eq!(action.trigger, "user-feedback");
    assert_eq!(action.action, ActionKind::Learn);
    assert!(action.success);
    assert!(action.strategy_id.is_none());
    assert!(action.based_on.contains(&feedback_id));

    match &learn.requests()[0].payload {
        ActionPayload::Learn { samples, feedback } => {
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].reward, -1.0);
            assert_eq!(feedback.as_ref().map(|f| f.rating), Some(1));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(s.store.list_feedback(Some(&inv.id)).unwrap().len(), 1);
}

#[tokio::test]
async fn test_good_rating_only_stores_feedback() {
    let s = setup(custom(vec![]), vec![], None);
    let inv = InvocationRecord::success("search", 100);
    s.metrics.record(&inv).unwrap();
    assert!(s.engine.record_feedback(Feedback::new(inv.id.clone(), 4)).await.unwrap().is_none());
    assert_eq!(s.store.list_feedback(None).unwrap().len(), 1);
    assert!(s.engine.healing_history(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_low_rating_without_learn_handler_is_only_stored() {
    let s = setup(custom(vec![]), vec![], None);
    let inv = InvocationRecord::success("search", 100);
    s.metrics.record(&inv).unwrap();
    assert!(s.engine.record_feedback(Feedback::new(inv.id.clone(), 2)).await.unwrap().is_none());
    assert_eq!(s.store.list_feedback(Some(&inv.id)).unwrap().len(), 1);
    assert!(s.engine.healing_history(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_low_rating_for_unknown_invocation_is_ignored() {
    let s = setup(custom(vec![]), vec![], None);
    assert!(s.engine.record_feedback(Feedback::new("missing", 1)).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Concurrency and history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cycles_for_same_tool_are_serialized() {
    let slow = Arc::new(SlowHandler::default());
    let s = setup(
        custom(vec![always("notify", ActionKind::Notify, 1)]),
        vec![(ActionKind::Notify, slow.clone() as Arc<dyn ActionHandler>)],
        None,
    );
    load(&s.metrics, "t", 3, 0);
    let (a, b) = tokio::join!(s.engine.analyze_and_adapt("t"), s.engine.analyze_and_adapt("t"));
    assert_eq!(a.unwrap().len() + b.unwrap().len(), 2);
    assert_eq!(slow.max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cycles_for_different_tools_may_overlap() {
    let slow = Arc::new(SlowHandler::default());
    let s = setup(
        custom(vec![always("notify", ActionKind::Notify, 1)]),
        vec![(ActionKind::Notify, slow.clone() as Arc<dyn ActionHandler>)],
        None,
    );
    load(&s.metrics, "a", 3, 0);
    load(&s.metrics, "b", 3, 0);
    let (a, b) = tokio::join!(s.engine.analyze_and_adapt("a"), s.engine.analyze_and_adapt("b"));
    a.unwrap();
    b.unwrap();
    assert_eq!(slow.max_seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cleanup_history_keeps_recent_actions() {
    let s = setup(custom(vec![always("opt", ActionKind::Optimize, 1)]), vec![], None);
    load(&s.metrics, "t", 13, 7);
    s.engine.analyze_and_adapt("t").await.unwrap();
    let report = s.engine.cleanup_history(Duration::from_secs(3600)).unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(s.engine.healing_history(None).unwrap().len(), 1);
}
