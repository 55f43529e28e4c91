//! # toolwatch
//!
//! Observability and self-improvement for pluggable tools.
//!
//! Every tool call is recorded as an [`InvocationRecord`]. From that history
//! the crate derives three things:
//!
//! - **Metrics** ([`metrics`]): per-tool success rates, latency percentiles,
//!   classified error aggregates and time-bucketed trends
//! - **Patterns** ([`patterns`]): recurring tool sequences, combinations,
//!   standout tools and repeated-failure anti-patterns mined from sessions
//! - **Adaptation** ([`strategy`]): rules that fire on metrics and run
//!   corrective actions, each leaving an auditable healing record
//!
//! [`Toolwatch`] wires the pieces to a single [`store`].

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod patterns;
pub mod service;
pub mod store;
pub mod strategy;
pub mod types;

pub use config::Config;
pub use error::{Result, ToolwatchError};
pub use metrics::classify::{classify_error, ErrorPattern, ErrorType};
pub use metrics::{MetricsEngine, ToolMetrics};
pub use patterns::{AntiPattern, DiscoveredPattern, PatternMiner};
pub use service::{Toolwatch, ToolwatchBuilder};
pub use store::{memory::MemoryStore, sqlite::SqliteStore, Store};
pub use strategy::{AdaptiveEngine, SelfHealingAction};
pub use types::{now_ms, Impact, InvocationContext, InvocationRecord};
