//! Strategy definitions and the records the engine writes.

use serde::{Deserialize, Serialize};

use crate::metrics::ToolMetrics;
use crate::types::Impact;

// ---------------------------------------------------------------------------
// Metric references
// ---------------------------------------------------------------------------

/// A numeric field of [`ToolMetrics`] that triggers and conditions can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    TotalInvocations,
    SuccessCount,
    FailureCount,
    SuccessRate,
    FailureRate,
    AvgLatency,
    MinLatency,
    MaxLatency,
    P50Latency,
    P95Latency,
    P99Latency,
    ErrorCount,
}

impl MetricField {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricField::TotalInvocations => "total_invocations",
            MetricField::SuccessCount => "success_count",
            MetricField::FailureCount => "failure_count",
            MetricField::SuccessRate => "success_rate",
            MetricField::FailureRate => "failure_rate",
            MetricField::AvgLatency => "avg_latency",
            MetricField::MinLatency => "min_latency",
            MetricField::MaxLatency => "max_latency",
            MetricField::P50Latency => "p50_latency",
            MetricField::P95Latency => "p95_latency",
            MetricField::P99Latency => "p99_latency",
            MetricField::ErrorCount => "error_count",
        }
    }

    /// Read the field. Rates are percentages.
    pub fn read(self, m: &ToolMetrics) -> f64 {
        match self {
            MetricField::TotalInvocations => m.total_invocations as f64,
            MetricField::SuccessCount => m.success_count as f64,
            MetricField::FailureCount => m.failure_count as f64,
            MetricField::SuccessRate => m.success_rate,
            MetricField::FailureRate => m.failure_rate(),
            MetricField::AvgLatency => m.avg_latency,
            MetricField::MinLatency => m.min_latency,
            MetricField::MaxLatency => m.max_latency,
            MetricField::P50Latency => m.p50_latency,
            MetricField::P95Latency => m.p95_latency,
            MetricField::P99Latency => m.p99_latency,
            MetricField::ErrorCount => m.error_patterns.iter().map(|p| p.count).sum::<u64>() as f64,
        }
    }

    /// Direction implied by the field name when a trigger omits one:
    /// rate-like fields fire below the threshold, everything else above.
    pub fn implied_direction(self) -> Direction {
        if self.as_str().contains("rate") && self != MetricField::FailureRate {
            Direction::Below
        } else {
            Direction::Above
        }
    }
}

impl std::fmt::Display for MetricField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gte => lhs >= rhs,
            CompareOp::Lte => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            CompareOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }
}

/// Guard evaluated against current metrics. All conditions must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: MetricField,
    pub op: CompareOp,
    pub value: f64,
}

impl Condition {
    pub fn new(metric: MetricField, op: CompareOp, value: f64) -> Self {
        Self { metric, op, value }
    }

    pub fn holds(&self, m: &ToolMetrics) -> bool {
        self.op.apply(self.metric.read(m), self.value)
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Fire when the value is strictly greater than the threshold.
    Above,
    /// Fire when the value is strictly less than the threshold.
    Below,
}

/// Occurrences of one error pattern that make it "repeated".
pub const REPEATED_ERROR_MIN_COUNT: u64 = 3;

/// Built-in detectors for pattern triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternDetector {
    /// Some error pattern has been seen at least 3 times.
    RepeatedError,
    /// p95 latency exceeds twice the average.
    DegradingPerformance,
    /// Success rate sits strictly between 50% and 80%.
    InconsistentResults,
}

impl PatternDetector {
    pub fn detect(self, m: &ToolMetrics) -> bool {
        match self {
            PatternDetector::RepeatedError => {
                m.error_patterns.iter().any(|p| p.count >= REPEATED_ERROR_MIN_COUNT)
            }
            PatternDetector::DegradingPerformance => m.p95_latency > m.avg_latency * 2.0,
            PatternDetector::InconsistentResults => m.success_rate > 50.0 && m.success_rate < 80.0,
        }
    }
}

impl std::fmt::Display for PatternDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternDetector::RepeatedError => write!(f, "repeated_error"),
            PatternDetector::DegradingPerformance => write!(f, "degrading_performance"),
            PatternDetector::InconsistentResults => write!(f, "inconsistent_results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Threshold {
        metric: MetricField,
        threshold: f64,
        /// Resolved at registration when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
    },
    Pattern { pattern: PatternDetector },
}

impl Trigger {
    pub fn threshold(metric: MetricField, threshold: f64, direction: Direction) -> Self {
        Trigger::Threshold { metric, threshold, direction: Some(direction) }
    }

    pub fn fires(&self, m: &ToolMetrics) -> bool {
        match self {
            Trigger::Threshold { metric, threshold, direction } => {
                let value = metric.read(m);
                match direction.unwrap_or_else(|| metric.implied_direction()) {
                    Direction::Above => value > *threshold,
                    Direction::Below => value < *threshold,
                }
            }
            Trigger::Pattern { pattern } => pattern.detect(m),
        }
    }

    /// Short label appended to the details of the healing actions it fires.
    pub fn describe(&self) -> String {
        match self {
            Trigger::Threshold { metric, threshold, direction } => {
                let dir = match direction.unwrap_or_else(|| metric.implied_direction()) {
                    Direction::Above => ">",
                    Direction::Below => "<",
                };
                format!("{metric} {dir} {threshold}")
            }
            Trigger::Pattern { pattern } => format!("pattern:{pattern}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Regenerate,
    Optimize,
    Learn,
    Fallback,
    Notify,
}

impl ActionKind {
    /// Impact recorded on the healing action this kind produces.
    pub fn impact(self) -> Impact {
        match self {
            ActionKind::Regenerate => Impact::High,
            ActionKind::Optimize | ActionKind::Fallback => Impact::Medium,
            ActionKind::Learn | ActionKind::Notify => Impact::Low,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Regenerate => write!(f, "regenerate"),
            ActionKind::Optimize => write!(f, "optimize"),
            ActionKind::Learn => write!(f, "learn"),
            ActionKind::Fallback => write!(f, "fallback"),
            ActionKind::Notify => write!(f, "notify"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Free-form parameters passed through to the action.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StrategyAction {
    pub fn new(kind: ActionKind) -> Self {
        Self { kind, params: serde_json::Value::Null }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Optimization,
    ErrorHandling,
    Performance,
    Quality,
}

fn default_enabled() -> bool {
    true
}

/// Caller-supplied strategy, before registration assigns id and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    pub kind: StrategyKind,
    pub trigger: Trigger,
    pub action: StrategyAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower runs first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveStrategy {
    pub id: String,
    pub name: String,
    pub kind: StrategyKind,
    pub trigger: Trigger,
    pub action: StrategyAction,
    pub enabled: bool,
    pub priority: u32,
    pub conditions: Vec<Condition>,
    pub trigger_count: u64,
    pub last_triggered: Option<u64>,
    pub created: u64,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Audit record of one executed strategy action. Written whether the action
/// succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHealingAction {
    pub id: String,
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    /// Strategy name, or `"user-feedback"`.
    pub trigger: String,
    pub action: ActionKind,
    pub success: bool,
    pub details: String,
    pub impact: Impact,
    /// Invocation, pattern or feedback ids that informed the action.
    #[serde(default)]
    pub based_on: Vec<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    Latency,
    Reliability,
    ErrorHandling,
}

impl std::fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestionCategory::Latency => write!(f, "latency"),
            SuggestionCategory::Reliability => write!(f, "reliability"),
            SuggestionCategory::ErrorHandling => write!(f, "error_handling"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub id: String,
    pub tool_id: String,
    pub category: SuggestionCategory,
    pub title: String,
    pub description: String,
    pub actions: Vec<String>,
    pub impact: Impact,
    pub effort: Effort,
    pub confidence: f64,
    #[serde(default)]
    pub based_on: Vec<String>,
    pub created_at: u64,
}

/// A user's rating of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub invocation_id: String,
    /// 1 (worst) to 5 (best).
    pub rating: u8,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub timestamp: u64,
}

impl Feedback {
    pub fn new(invocation_id: impl Into<String>, rating: u8) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            rating,
            issues: Vec::new(),
            suggestions: Vec::new(),
            notes: None,
            timestamp: crate::types::now_ms(),
        }
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackCandidate {
    pub tool_id: String,
    pub score: f32,
}

/// Ordered alternatives for a tool, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackChain {
    pub tool_id: String,
    pub fallbacks: Vec<FallbackCandidate>,
    pub reason: String,
    pub created_at: u64,
}
