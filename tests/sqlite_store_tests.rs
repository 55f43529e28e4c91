//! Tests for the SQLite store: persistence across reopen, ordering, history
//! tables and pruning.

use toolwatch::metrics::classify::ErrorType;
use toolwatch::patterns::{DiscoveredPattern, PatternKind, PatternOutcomes};
use toolwatch::store::sqlite::SqliteStore;
use toolwatch::store::{HistoryStore, InvocationStore, Store};
use toolwatch::strategy::types::{
    ActionKind, Effort, FallbackCandidate, FallbackChain, Feedback, OptimizationSuggestion,
    SelfHealingAction, SuggestionCategory,
};
use toolwatch::{Impact, InvocationRecord, ToolwatchError};

fn healing(tool: &str, ts: u64, success: bool) -> SelfHealingAction {
    SelfHealingAction {
        id: uuid::Uuid::new_v4().to_string(),
        tool_id: tool.into(),
        strategy_id: Some("s1".into()),
        trigger: "test".into(),
        action: ActionKind::Optimize,
        success,
        details: "ok".into(),
        impact: Impact::Medium,
        based_on: vec!["inv-1".into()],
        timestamp: ts,
    }
}

fn pattern(id_key: &str, last_seen: u64) -> DiscoveredPattern {
    DiscoveredPattern {
        id: DiscoveredPattern::make_id(PatternKind::Sequence, id_key),
        kind: PatternKind::Sequence,
        tools: vec!["a".into(), "b".into()],
        confidence: 0.9,
        support: 5,
        frequency: 7,
        outcomes: PatternOutcomes::derive(0.9, 120.0, 5),
        discovered: 1,
        last_seen,
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tw.db");
    let rec = InvocationRecord::failure("search", 42, "timeout").with_session("s1");
    {
        let store = SqliteStore::open(&path).unwrap();
        store.append(&rec).unwrap();
        store.record_error("search", ErrorType::Timeout, &rec.id, rec.timestamp).unwrap();
        store.upsert_pattern(&pattern("a -> b", 10)).unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get_invocation(&rec.id).unwrap(), Some(rec.clone()));
    assert_eq!(store.invocations_for_session("s1").unwrap().len(), 1);
    assert_eq!(store.error_patterns_for_tool("search").unwrap()[0].count, 1);
    assert_eq!(store.list_patterns().unwrap().len(), 1);
}

#[test]
fn test_queries_filter_and_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&InvocationRecord::success("b", 1).with_timestamp(30)).unwrap();
    store.append(&InvocationRecord::success("a", 1).with_timestamp(20)).unwrap();
    store.append(&InvocationRecord::success("a", 2).with_timestamp(10)).unwrap();

    assert_eq!(store.tool_ids().unwrap(), vec!["a".to_string(), "b".to_string()]);
    let a: Vec<u64> = store.invocations_for_tool("a").unwrap().iter().map(|r| r.timestamp).collect();
    assert_eq!(a, vec![10, 20]);
    let recent = store.recent_invocations_for_tool("a", 1).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].timestamp, 20);
    assert_eq!(store.invocations_since(20).unwrap().len(), 2);
    assert_eq!(store.all_invocations().unwrap()[0].timestamp, 10);
    assert!(store.get_invocation("missing").unwrap().is_none());
}

#[test]
fn test_delete_before_cutoff() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&InvocationRecord::success("a", 1).with_timestamp(10)).unwrap();
    store.append(&InvocationRecord::success("a", 1).with_timestamp(100)).unwrap();
    store.record_error("a", ErrorType::NotFound, "x", 10).unwrap();
    assert_eq!(store.delete_invocations_before(50).unwrap(), 1);
    assert_eq!(store.delete_error_patterns_before(50).unwrap(), 1);
    assert_eq!(store.all_invocations().unwrap().len(), 1);
    assert!(store.all_error_patterns().unwrap().is_empty());
}

#[test]
fn test_out_of_range_timestamps_are_rejected() {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store.append(&InvocationRecord::success("a", 1).with_timestamp(u64::MAX)).unwrap_err();
    assert!(matches!(err, ToolwatchError::Validation(_)));
    let err = store.append(&InvocationRecord::success("a", u64::MAX).with_timestamp(10)).unwrap_err();
    assert!(matches!(err, ToolwatchError::Validation(_)));
    assert!(store.all_invocations().unwrap().is_empty());
    assert!(matches!(
        store.insert_healing_action(&healing("a", u64::MAX, true)),
        Err(ToolwatchError::Validation(_))
    ));
    assert!(store.list_healing_actions(None).unwrap().is_empty());
}

#[test]
fn test_far_future_bounds_are_clamped() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&InvocationRecord::success("a", 1).with_timestamp(10)).unwrap();
    assert!(store.invocations_since(u64::MAX).unwrap().is_empty());
    assert_eq!(store.delete_invocations_before(u64::MAX).unwrap(), 1);
}

// ---------------------------------------------------------------------------
// History tables
// ---------------------------------------------------------------------------

#[test]
fn test_pattern_upsert_replaces() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert_pattern(&pattern("a -> b", 10)).unwrap();
    let mut p = pattern("a -> b", 20);
    p.support = 9;
    store.upsert_pattern(&p).unwrap();
    let got = store.get_pattern(&p.id).unwrap().unwrap();
    assert_eq!(got.support, 9);
    assert_eq!(store.list_patterns().unwrap().len(), 1);
}

#[test]
fn test_healing_actions_in_insertion_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_healing_action(&healing("a", 30, true)).unwrap();
    store.insert_healing_action(&healing("b", 10, false)).unwrap();
    store.insert_healing_action(&healing("a", 20, true)).unwrap();
    let all = store.list_healing_actions(None).unwrap();
    let ts: Vec<u64> = all.iter().map(|a| a.timestamp).collect();
    assert_eq!(ts, vec![30, 10, 20]);
    assert_eq!(store.list_healing_actions(Some("a")).unwrap().len(), 2);
    assert_eq!(all[0].based_on, vec!["inv-1".to_string()]);
}

#[test]
fn test_suggestions_feedback_and_fallbacks() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .insert_suggestion(&OptimizationSuggestion {
            id: "sg1".into(),
            tool_id: "a".into(),
            category: SuggestionCategory::Reliability,
            title: "t".into(),
            description: "d".into(),
            actions: vec!["retry".into()],
            impact: Impact::High,
            effort: Effort::Low,
            confidence: 0.9,
            based_on: vec![],
            created_at: 5,
        })
        .unwrap();
    store.insert_feedback(&Feedback::new("inv-1", 2)).unwrap();
    store
        .set_fallback_chain(&FallbackChain {
            tool_id: "a".into(),
            fallbacks: vec![FallbackCandidate { tool_id: "b".into(), score: 0.8 }],
            reason: "slow".into(),
            created_at: 5,
        })
        .unwrap();
    store
        .set_fallback_chain(&FallbackChain {
            tool_id: "a".into(),
            fallbacks: vec![FallbackCandidate { tool_id: "c".into(), score: 0.7 }],
            reason: "slower".into(),
            created_at: 6,
        })
        .unwrap();

    assert_eq!(store.list_suggestions(Some("a")).unwrap().len(), 1);
    assert!(store.list_suggestions(Some("b")).unwrap().is_empty());
    assert_eq!(store.list_feedback(Some("inv-1")).unwrap()[0].rating, 2);
    let chain = store.get_fallback_chain("a").unwrap().unwrap();
    assert_eq!(chain.fallbacks[0].tool_id, "c");
    assert_eq!(store.list_fallback_chains().unwrap().len(), 1);
}

#[test]
fn test_prune_history_counts_per_table() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert_pattern(&pattern("old", 1)).unwrap();
    store.upsert_pattern(&pattern("new", 1_000)).unwrap();
    store.insert_healing_action(&healing("a", 1, true)).unwrap();
    store.insert_healing_action(&healing("a", 1_000, true)).unwrap();

    let report = store.prune_history(500).unwrap();
    assert_eq!(report.patterns, 1);
    assert_eq!(report.healing_actions, 1);
    assert_eq!(report.total(), 2);
    assert_eq!(store.list_patterns().unwrap().len(), 1);
}

#[test]
fn test_export_json_from_sqlite() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&InvocationRecord::success("a", 1)).unwrap();
    store.insert_healing_action(&healing("a", 1, true)).unwrap();
    let doc = store.export_json().unwrap();
    assert_eq!(doc["invocations"].as_array().unwrap().len(), 1);
    assert_eq!(doc["healing_actions"].as_array().unwrap().len(), 1);
    assert!(doc["exported_at"].as_u64().is_some());
}
