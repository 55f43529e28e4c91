//! Core record types shared by every component.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// InvocationRecord
// ---------------------------------------------------------------------------

/// Correlation data attached to an invocation by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_invocation_id: Option<String>,
}

/// One observed call to a tool. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub server_id: String,
    pub server_name: String,
    /// Completion time, ms since epoch.
    pub timestamp: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque payloads. Stored, never interpreted.
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub context: InvocationContext,
}

impl InvocationRecord {
    /// A successful invocation with a fresh id and the current timestamp.
    ///
    /// `tool_id` doubles as the tool name and the owning server defaults to
    /// `"local"`; use the `with_*` builders to override.
    pub fn success(tool_id: impl Into<String>, duration_ms: u64) -> Self {
        let tool_id = tool_id.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_id.clone(),
            tool_id,
            server_id: "local".to_string(),
            server_name: "local".to_string(),
            timestamp: now_ms(),
            duration_ms,
            success: true,
            error: None,
            params: serde_json::Value::Null,
            result: serde_json::Value::Null,
            context: InvocationContext::default(),
        }
    }

    /// A failed invocation carrying `error`.
    pub fn failure(tool_id: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        let mut rec = Self::success(tool_id, duration_ms);
        rec.success = false;
        rec.error = Some(error.into());
        rec
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_server(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.server_id = id.into();
        self.server_name = name.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn with_context(mut self, context: InvocationContext) -> Self {
        self.context = context;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.context.session_id.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Impact
// ---------------------------------------------------------------------------

/// Coarse impact level shared by patterns, anti-patterns, suggestions and
/// healing actions. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Impact::Low => write!(f, "low"),
            Impact::Medium => write!(f, "medium"),
            Impact::High => write!(f, "high"),
            Impact::Critical => write!(f, "critical"),
        }
    }
}
