//! In-memory strategy registry and the built-in default strategies.

use crate::error::{Result, ToolwatchError};
use crate::types::now_ms;

use super::types::{
    ActionKind, AdaptiveStrategy, CompareOp, Condition, Direction, MetricField, PatternDetector,
    StrategyAction, StrategyDefinition, StrategyKind, Trigger,
};

/// The five strategies seeded into an empty registry.
pub fn default_definitions() -> Vec<StrategyDefinition> {
    let guard = |min: f64| vec![Condition::new(MetricField::TotalInvocations, CompareOp::Gte, min)];
    vec![
        StrategyDefinition {
            name: "Auto-regenerate on high failure rate".into(),
            kind: StrategyKind::ErrorHandling,
            trigger: Trigger::threshold(MetricField::SuccessRate, 70.0, Direction::Below),
            action: StrategyAction::new(ActionKind::Regenerate),
            enabled: true,
            priority: 1,
            conditions: guard(10.0),
        },
        StrategyDefinition {
            name: "Optimize slow tool latency".into(),
            kind: StrategyKind::Performance,
            trigger: Trigger::threshold(MetricField::P95Latency, 5000.0, Direction::Above),
            action: StrategyAction::new(ActionKind::Optimize),
            enabled: true,
            priority: 2,
            conditions: guard(20.0),
        },
        StrategyDefinition {
            name: "Learn from repeated errors".into(),
            kind: StrategyKind::ErrorHandling,
            trigger: Trigger::Pattern { pattern: PatternDetector::RepeatedError },
            action: StrategyAction::new(ActionKind::Learn),
            enabled: true,
            priority: 3,
            conditions: guard(5.0),
        },
        StrategyDefinition {
            name: "Fallback on degrading performance".into(),
            kind: StrategyKind::Performance,
            trigger: Trigger::Pattern { pattern: PatternDetector::DegradingPerformance },
            action: StrategyAction::new(ActionKind::Fallback),
            enabled: true,
            priority: 4,
            conditions: guard(10.0),
        },
        StrategyDefinition {
            name: "Notify on inconsistent results".into(),
            kind: StrategyKind::Quality,
            trigger: Trigger::Pattern { pattern: PatternDetector::InconsistentResults },
            action: StrategyAction::new(ActionKind::Notify),
            enabled: true,
            priority: 5,
            conditions: guard(10.0),
        },
    ]
}

#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: Vec<AdaptiveStrategy>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `def`, returning the new strategy id.
    ///
    /// A threshold trigger without a direction gets the one implied by its
    /// metric name, with a warning.
    pub fn add(&mut self, mut def: StrategyDefinition) -> Result<String> {
        if def.name.trim().is_empty() {
            return Err(ToolwatchError::Validation("strategy name must not be empty".into()));
        }
        if let Trigger::Threshold { metric, threshold, direction } = &mut def.trigger {
            if !threshold.is_finite() {
                return Err(ToolwatchError::Validation(format!(
                    "strategy '{}' has a non-finite threshold",
                    def.name
                )));
            }
            if direction.is_none() {
                let implied = metric.implied_direction();
                tracing::warn!(
                    target: "toolwatch::strategy",
                    strategy = %def.name,
                    metric = %metric,
                    direction = ?implied,
                    "Threshold trigger has no direction, inferring from metric name"
                );
                *direction = Some(implied);
            }
        }
        if def.conditions.iter().any(|c| !c.value.is_finite()) {
            return Err(ToolwatchError::Validation(format!(
                "strategy '{}' has a non-finite condition value",
                def.name
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.strategies.push(AdaptiveStrategy {
            id: id.clone(),
            name: def.name,
            kind: def.kind,
            trigger: def.trigger,
            action: def.action,
            enabled: def.enabled,
            priority: def.priority,
            conditions: def.conditions,
            trigger_count: 0,
            last_triggered: None,
            created: now_ms(),
        });
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&AdaptiveStrategy> {
        self.strategies.iter().find(|s| s.id == id)
    }

    /// Registration order.
    pub fn list(&self) -> &[AdaptiveStrategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Returns false when `id` is unknown.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.strategies.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn mark_triggered(&mut self, id: &str, at_ms: u64) {
        if let Some(s) = self.strategies.iter_mut().find(|s| s.id == id) {
            s.trigger_count += 1;
            s.last_triggered = Some(at_ms);
        }
    }
}
