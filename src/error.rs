//! Crate-wide error type.
//!
//! Store failures propagate untouched through `?`. Lookups that can legitimately
//! miss return `Option` instead of an error; action-handler failures are caught
//! by the strategy engine and recorded, never surfaced from an analysis cycle.

/// Every fallible function in the crate returns `Result<T, ToolwatchError>`.
#[derive(Debug, thiserror::Error)]
pub enum ToolwatchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A caller-supplied action handler reported a failure.
    #[error("Action error: {0}")]
    Action(String),

    /// The semantic search collaborator failed or is not configured.
    #[error("Search error: {0}")]
    Search(String),

    #[error("{0}")]
    Internal(String),
}

impl ToolwatchError {
    /// Short machine-readable tag, logged as `error_kind` on failed healing actions.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolwatchError::Database(_) => "database",
            ToolwatchError::Serde(_) => "serde",
            ToolwatchError::Io(_) => "io",
            ToolwatchError::Config(_) => "config",
            ToolwatchError::Validation(_) => "validation",
            ToolwatchError::Action(_) => "action",
            ToolwatchError::Search(_) => "search",
            ToolwatchError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolwatchError>;
