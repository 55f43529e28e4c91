//! Seams to external collaborators.
//!
//! The engine never generates code, trains models or sends notifications
//! itself. `regenerate`, `learn` and `notify` actions are delegated to an
//! [`ActionHandler`] registered per [`ActionKind`]; `fallback` needs a
//! [`SemanticSearch`] to find similar tools.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::ToolMetrics;
use crate::patterns::AntiPattern;
use crate::strategy::types::{ActionKind, Feedback};
use crate::types::InvocationRecord;

/// One training example handed to a `learn` handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSample {
    pub invocation_id: String,
    /// `1.0` for a success, `-1.0` for a failure.
    pub reward: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
}

impl From<&InvocationRecord> for LearningSample {
    fn from(r: &InvocationRecord) -> Self {
        Self {
            invocation_id: r.id.clone(),
            reward: if r.success { 1.0 } else { -1.0 },
            duration_ms: r.duration_ms,
            error: r.error.clone(),
            timestamp: r.timestamp,
        }
    }
}

/// Kind-specific input for a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    Regenerate {
        failure_summary: String,
        recent_failures: Vec<InvocationRecord>,
        /// Known anti-patterns involving the tool, to steer the rewrite.
        anti_patterns: Vec<AntiPattern>,
    },
    Learn {
        samples: Vec<LearningSample>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<Feedback>,
    },
    Notify {
        message: String,
        metrics: Box<ToolMetrics>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub tool_id: String,
    pub tool_name: String,
    /// Strategy name, or `"user-feedback"`.
    pub trigger: String,
    /// Pass-through from the strategy's action definition.
    #[serde(default)]
    pub params: serde_json::Value,
    pub payload: ActionPayload,
}

/// What a handler reports back on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub details: String,
    /// Extra ids to record on the healing action.
    #[serde(default)]
    pub based_on: Vec<String>,
}

impl ActionOutcome {
    pub fn new(details: impl Into<String>) -> Self {
        Self { details: details.into(), based_on: Vec::new() }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, request: ActionRequest) -> Result<ActionOutcome>;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Result<ActionOutcome>> + Send>>;

/// Adapts an async closure into an [`ActionHandler`].
pub struct FnHandler {
    f: Box<dyn Fn(ActionRequest) -> BoxedHandlerFuture + Send + Sync>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionOutcome>> + Send + 'static,
    {
        Arc::new(Self { f: Box::new(move |req| Box::pin(f(req))) })
    }
}

#[async_trait]
impl ActionHandler for FnHandler {
    async fn handle(&self, request: ActionRequest) -> Result<ActionOutcome> {
        (self.f)(request).await
    }
}

/// A tool id returned by [`SemanticSearch::search`] with its similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// Vector search over the tool catalogue.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Up to `k` nearest tools, best first.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;
}
