//! Metric-driven optimization suggestions.

use serde::{Deserialize, Serialize};

use crate::metrics::ToolMetrics;
use crate::types::{now_ms, Impact};

use super::types::{Effort, OptimizationSuggestion, SuggestionCategory};

/// p95 latency above this produces a latency suggestion.
pub const SLOW_P95_MS: f64 = 3000.0;
/// Success rate (percent) below this produces a reliability suggestion.
pub const UNRELIABLE_SUCCESS_RATE: f64 = 90.0;

/// Restrict generation to one category. `None` means all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationFocus {
    Latency,
    Reliability,
    ErrorHandling,
}

impl OptimizationFocus {
    /// Read a focus from action params of the form `{"focus": "latency"}`.
    pub fn from_params(params: &serde_json::Value) -> Option<Self> {
        params
            .get("focus")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn allows(focus: Option<Self>, wanted: Self) -> bool {
        focus.map_or(true, |f| f == wanted)
    }
}

#[allow(clippy::too_many_arguments)]
fn suggestion(
    tool_id: &str,
    category: SuggestionCategory,
    title: String,
    description: String,
    actions: &[&str],
    impact: Impact,
    effort: Effort,
    confidence: f64,
    based_on: Vec<String>,
) -> OptimizationSuggestion {
    OptimizationSuggestion {
        id: uuid::Uuid::new_v4().to_string(),
        tool_id: tool_id.to_string(),
        category,
        title,
        description,
        actions: actions.iter().map(|a| a.to_string()).collect(),
        impact,
        effort,
        confidence,
        based_on,
        created_at: now_ms(),
    }
}

/// Suggestions for `tool_id` derived from `metrics`. Not persisted here.
pub fn generate_optimizations(
    tool_id: &str,
    metrics: &ToolMetrics,
    focus: Option<OptimizationFocus>,
) -> Vec<OptimizationSuggestion> {
    let mut out = Vec::new();

    if OptimizationFocus::allows(focus, OptimizationFocus::Latency) && metrics.p95_latency > SLOW_P95_MS {
        out.push(suggestion(
            tool_id,
            SuggestionCategory::Latency,
            format!("Reduce p95 latency of {}", metrics.tool_name),
            format!(
                "p95 latency is {:.0}ms (avg {:.0}ms), above the {SLOW_P95_MS:.0}ms target",
                metrics.p95_latency, metrics.avg_latency
            ),
            &[
                "Cache results for repeated inputs",
                "Lower the request timeout and retry on a faster path",
                "Batch or parallelize upstream calls",
            ],
            Impact::High,
            Effort::Medium,
            0.85,
            vec![format!("metrics:{tool_id}")],
        ));
    }

    if OptimizationFocus::allows(focus, OptimizationFocus::Reliability)
        && metrics.success_rate < UNRELIABLE_SUCCESS_RATE
    {
        out.push(suggestion(
            tool_id,
            SuggestionCategory::Reliability,
            format!("Improve reliability of {}", metrics.tool_name),
            format!(
                "Success rate is {:.1}% over {} invocations",
                metrics.success_rate, metrics.total_invocations
            ),
            &[
                "Retry transient failures with exponential backoff",
                "Validate parameters before invoking the tool",
                "Register a fallback tool",
            ],
            Impact::High,
            Effort::Low,
            0.9,
            vec![format!("metrics:{tool_id}")],
        ));
    }

    if OptimizationFocus::allows(focus, OptimizationFocus::ErrorHandling) {
        if let Some(top) = metrics.error_patterns.first() {
            out.push(suggestion(
                tool_id,
                SuggestionCategory::ErrorHandling,
                format!("Handle {} errors in {}", top.error_type, metrics.tool_name),
                format!(
                    "{} {} errors since {}; most recent at {}",
                    top.count, top.error_type, top.first_seen, top.last_seen
                ),
                &[
                    "Add a dedicated handler for this error class",
                    "Surface a clearer message to the caller",
                ],
                Impact::Medium,
                Effort::Low,
                0.95,
                top.examples.iter().map(str::to_string).collect(),
            ));
        }
    }

    out
}
