//! Error classification and the per-tool error-pattern aggregate.
//!
//! [`classify_error`] is a pure function of the error string: the same string
//! always yields the same [`ErrorType`]. Anti-pattern symptom dedup and the
//! `repeated_error` strategy trigger both depend on that stability.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Maximum number of example invocation/session ids kept per aggregate.
pub const EXAMPLE_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// ErrorType
// ---------------------------------------------------------------------------

/// Fixed error classes, listed in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimit,
    ValidationError,
    NetworkError,
    UnknownError,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::NotFound => "not_found",
            ErrorType::Unauthorized => "unauthorized",
            ErrorType::Forbidden => "forbidden",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::ValidationError => "validation_error",
            ErrorType::NetworkError => "network_error",
            ErrorType::UnknownError => "unknown_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        CLASSIFICATION
            .iter()
            .map(|(t, _)| *t)
            .chain(std::iter::once(ErrorType::UnknownError))
            .find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substrings per class, checked in order. First match wins.
const CLASSIFICATION: &[(ErrorType, &[&str])] = &[
    (ErrorType::Timeout, &["timeout", "timed out"]),
    (ErrorType::NotFound, &["not found", "404", "enoent"]),
    (ErrorType::Unauthorized, &["unauthorized", "401"]),
    (ErrorType::Forbidden, &["forbidden", "403"]),
    (ErrorType::RateLimit, &["rate limit", "rate_limit", "too many requests", "429"]),
    (ErrorType::ValidationError, &["validation", "invalid"]),
    (ErrorType::NetworkError, &["network", "econnrefused", "econnreset", "connection"]),
];

/// Classify an error message. Unmatched strings are `UnknownError`, never fatal.
pub fn classify_error(error: &str) -> ErrorType {
    let lower = error.to_lowercase();
    CLASSIFICATION
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(t, _)| *t)
        .unwrap_or(ErrorType::UnknownError)
}

// ---------------------------------------------------------------------------
// ExampleRing
// ---------------------------------------------------------------------------

/// Bounded list of example ids. Evicts the oldest entry when full.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ExampleRing {
    items: VecDeque<String>,
}

impl ExampleRing {
    pub fn new() -> Self {
        Self { items: VecDeque::with_capacity(EXAMPLE_CAPACITY) }
    }

    pub fn push(&mut self, id: impl Into<String>) {
        if self.items.len() >= EXAMPLE_CAPACITY {
            self.items.pop_front();
        }
        self.items.push_back(id.into());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i == id)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for ExampleRing {
    fn from(v: Vec<String>) -> Self {
        let mut ring = ExampleRing::new();
        for id in v {
            ring.push(id);
        }
        ring
    }
}

impl From<ExampleRing> for Vec<String> {
    fn from(r: ExampleRing) -> Self {
        r.items.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// ErrorPattern
// ---------------------------------------------------------------------------

/// Running aggregate over failures for one `(tool_id, error_type)` pair.
///
/// Updated incrementally on every failing invocation, never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub tool_id: String,
    pub error_type: ErrorType,
    pub count: u64,
    pub first_seen: u64,
    pub last_seen: u64,
    pub examples: ExampleRing,
}

impl ErrorPattern {
    pub fn new(tool_id: impl Into<String>, error_type: ErrorType, at_ms: u64) -> Self {
        Self {
            tool_id: tool_id.into(),
            error_type,
            count: 0,
            first_seen: at_ms,
            last_seen: at_ms,
            examples: ExampleRing::new(),
        }
    }

    /// Fold one more failing invocation into the aggregate.
    pub fn observe(&mut self, invocation_id: &str, at_ms: u64) {
        self.count += 1;
        self.first_seen = self.first_seen.min(at_ms);
        self.last_seen = self.last_seen.max(at_ms);
        self.examples.push(invocation_id);
    }
}

/// Order error patterns most frequent first, ties by most recent.
pub fn rank_error_patterns(patterns: &mut [ErrorPattern]) {
    patterns.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.last_seen.cmp(&a.last_seen))
            .then(a.error_type.cmp(&b.error_type))
    });
}
