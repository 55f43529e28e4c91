//! # Stage: Adaptive Strategy Engine
//!
//! ## Responsibility
//! Closes the loop from metrics to corrective action. A registry of
//! [`AdaptiveStrategy`] rules is evaluated against a tool's current
//! [`ToolMetrics`](crate::metrics::ToolMetrics); every rule that fires runs
//! its action and leaves a [`SelfHealingAction`] audit record.
//!
//! ## Guarantees
//! - Ordering: triggered strategies execute sequentially by ascending
//!   priority, ties in registration order
//! - Isolation: a failing action is recorded as `success = false` with a
//!   `"Failed: ..."` detail and never aborts the remaining strategies
//! - Serialization: at most one analysis cycle per tool runs at a time
//! - Startup validation: an enabled strategy whose action has no executor is
//!   rejected at registration, not discovered mid-cycle
//!
//! ## NOT Responsible For
//! - Generating code, training models or delivering notifications (see
//!   [`handlers::ActionHandler`])
//! - Embedding or vector search (see [`handlers::SemanticSearch`])

pub mod engine;
pub mod handlers;
pub mod optimize;
pub mod registry;
pub mod types;

pub use engine::{should_trigger, AdaptiveEngine, AdaptiveEngineBuilder};
pub use handlers::{ActionHandler, ActionOutcome, ActionPayload, ActionRequest, FnHandler, SemanticSearch};
pub use types::{
    ActionKind, AdaptiveStrategy, Feedback, OptimizationSuggestion, SelfHealingAction,
    StrategyDefinition,
};
