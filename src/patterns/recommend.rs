//! Ranking stored patterns against the caller's current tool set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{DiscoveredPattern, PatternKind};

/// Patterns below this confidence are never recommended.
pub const RECOMMENDATION_MIN_CONFIDENCE: f64 = 0.7;
/// Candidates considered after the frequency sort.
pub const CANDIDATE_POOL: usize = 20;
/// Relevance floor for a returned recommendation.
pub const MIN_RELEVANCE: f64 = 0.3;
/// Outcome success rate above which a pattern is tagged as reliability-critical.
pub const HIGH_RELIABILITY_SUCCESS_RATE: f64 = 0.95;

pub const TAG_SEQUENTIAL: &str = "sequential-workflow";
pub const TAG_MULTI_TOOL: &str = "multi-tool-task";
pub const TAG_HIGH_RELIABILITY: &str = "high-reliability-required";

/// Caller-side context. Echoed into each recommendation's tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecommendation {
    pub pattern: DiscoveredPattern,
    /// `overlap / max(|pattern.tools|, |current|) * confidence`.
    pub relevance: f64,
    pub reasoning: String,
    pub applicable_context: Vec<String>,
}

/// Tool-overlap relevance of one pattern.
///
/// Overlap counts distinct shared tools; the denominator uses the pattern's
/// full tool list, so a repeated step (`A -> A`) dilutes the score.
pub fn relevance(pattern: &DiscoveredPattern, current: &HashSet<&str>) -> f64 {
    let pattern_tools: HashSet<&str> = pattern.tools.iter().map(String::as_str).collect();
    let denom = pattern.tools.len().max(current.len());
    if denom == 0 {
        return 0.0;
    }
    let overlap = pattern_tools.intersection(current).count();
    overlap as f64 / denom as f64 * pattern.confidence
}

/// Coarse situations a pattern applies to, plus the caller's task type.
pub fn context_tags(pattern: &DiscoveredPattern, context: &RecommendationContext) -> Vec<String> {
    let mut tags = Vec::new();
    if pattern.kind == PatternKind::Sequence {
        tags.push(TAG_SEQUENTIAL.to_string());
    }
    if pattern.tools.len() > 1 {
        tags.push(TAG_MULTI_TOOL.to_string());
    }
    if pattern.outcomes.success_rate > HIGH_RELIABILITY_SUCCESS_RATE {
        tags.push(TAG_HIGH_RELIABILITY.to_string());
    }
    if let Some(task) = &context.task_type {
        tags.push(format!("task:{task}"));
    }
    tags
}

/// Filter, rank and annotate `patterns` for `current_tools`.
pub fn rank(
    mut patterns: Vec<DiscoveredPattern>,
    context: &RecommendationContext,
    current_tools: &[String],
    limit: usize,
) -> Vec<PatternRecommendation> {
    patterns.retain(|p| p.confidence > RECOMMENDATION_MIN_CONFIDENCE);
    patterns.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a.id.cmp(&b.id))
    });
    patterns.truncate(CANDIDATE_POOL);

    let current: HashSet<&str> = current_tools.iter().map(String::as_str).collect();
    let mut scored: Vec<(f64, DiscoveredPattern)> = patterns
        .into_iter()
        .map(|p| (relevance(&p, &current), p))
        .filter(|(r, _)| *r >= MIN_RELEVANCE)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(relevance, pattern)| {
            let missing: Vec<&str> = pattern
                .tools
                .iter()
                .map(String::as_str)
                .filter(|t| !current.contains(t))
                .collect();
            let reasoning = if missing.is_empty() {
                format!(
                    "{} pattern [{}] succeeded in {:.0}% of {} occurrences",
                    pattern.kind,
                    pattern.tools.join(", "),
                    pattern.confidence * 100.0,
                    pattern.support
                )
            } else {
                format!(
                    "{} pattern [{}] succeeded in {:.0}% of {} occurrences; consider adding {}",
                    pattern.kind,
                    pattern.tools.join(", "),
                    pattern.confidence * 100.0,
                    pattern.support,
                    missing.join(", ")
                )
            };

            let applicable_context = context_tags(&pattern, context);

            PatternRecommendation { pattern, relevance, reasoning, applicable_context }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternOutcomes;

    fn pattern(tools: &[&str], confidence: f64, frequency: u64) -> DiscoveredPattern {
        let key = tools.join(" -> ");
        DiscoveredPattern {
            id: DiscoveredPattern::make_id(PatternKind::Sequence, &key),
            kind: PatternKind::Sequence,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            confidence,
            support: frequency,
            frequency,
            outcomes: PatternOutcomes::derive(confidence, 100.0, frequency),
            discovered: 0,
            last_seen: 0,
        }
    }

    fn tools(v: &[&str]) -> Vec<String> {
        v.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_relevance_formula() {
        let p = pattern(&["A", "B"], 0.9, 5);
        let current: HashSet<&str> = ["A", "B", "C"].into_iter().collect();
        assert!((relevance(&p, &current) - 2.0 / 3.0 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_patterns_excluded() {
        let ps = vec![pattern(&["A", "B"], 0.7, 10)];
        assert!(rank(ps, &RecommendationContext::default(), &tools(&["A", "B"]), 5).is_empty());
    }

    #[test]
    fn test_low_relevance_dropped() {
        // overlap 1 / max(4, 1) * 1.0 = 0.25
        let ps = vec![pattern(&["A", "B", "C", "D"], 1.0, 10)];
        assert!(rank(ps, &RecommendationContext::default(), &tools(&["A"]), 5).is_empty());
    }

    #[test]
    fn test_sorted_by_relevance_and_limited() {
        let ps = vec![
            pattern(&["A", "X"], 0.8, 50),
            pattern(&["A", "B"], 0.95, 10),
            pattern(&["B", "Y"], 0.9, 30),
        ];
        let recs = rank(ps, &RecommendationContext::default(), &tools(&["A", "B"]), 2);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].pattern.tools, vec!["A", "B"]);
        assert!(recs[0].relevance >= recs[1].relevance);
    }

    #[test]
    fn test_reasoning_names_missing_tools_and_context_tags() {
        let ps = vec![pattern(&["A", "B"], 0.9, 8)];
        let ctx = RecommendationContext { task_type: Some("research".into()), session_id: None };
        let recs = rank(ps, &ctx, &tools(&["A"]), 5);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].reasoning.contains("consider adding B"));
        assert!(recs[0].applicable_context.contains(&"task:research".to_string()));
        assert!(recs[0].applicable_context.contains(&TAG_SEQUENTIAL.to_string()));
    }

    #[test]
    fn test_repeated_step_dilutes_relevance() {
        let p = pattern(&["A", "A"], 0.9, 5);
        let current: HashSet<&str> = ["A"].into_iter().collect();
        assert!((relevance(&p, &current) - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_context_tags_for_reliable_sequence() {
        let p = pattern(&["A", "B"], 1.0, 5);
        assert_eq!(
            context_tags(&p, &RecommendationContext::default()),
            vec![TAG_SEQUENTIAL, TAG_MULTI_TOOL, TAG_HIGH_RELIABILITY]
        );
    }

    #[test]
    fn test_context_tags_for_single_tool_success_pattern() {
        let mut p = pattern(&["A"], 0.9, 5);
        p.kind = PatternKind::SuccessPattern;
        let ctx = RecommendationContext { task_type: Some("triage".into()), session_id: None };
        assert_eq!(context_tags(&p, &ctx), vec!["task:triage".to_string()]);
    }

    #[test]
    fn test_combination_is_multi_tool_but_not_sequential() {
        let mut p = pattern(&["A", "B"], 0.9, 5);
        p.kind = PatternKind::Combination;
        let tags = context_tags(&p, &RecommendationContext::default());
        assert_eq!(tags, vec![TAG_MULTI_TOOL]);
    }

    #[test]
    fn test_empty_current_tools_yields_nothing() {
        let ps = vec![pattern(&["A", "B"], 0.9, 8)];
        assert!(rank(ps, &RecommendationContext::default(), &[], 5).is_empty());
    }
}
