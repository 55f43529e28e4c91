//! Runtime configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! ```toml
//! log_filter = "info,toolwatch=debug"
//!
//! [store]
//! path = "toolwatch.db"
//!
//! [metrics]
//! cache_ttl_ms = 60000
//!
//! [strategy]
//! seed_defaults = true
//! recent_failure_limit = 10
//!
//! [[strategy.definitions]]
//! name = "Optimize when p99 explodes"
//! kind = "performance"
//! priority = 1
//! trigger = { type = "threshold", metric = "p99_latency", threshold = 8000.0, direction = "above" }
//! action = { type = "optimize" }
//! conditions = [{ metric = "total_invocations", op = "gte", value = 50.0 }]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::strategy::types::StrategyDefinition;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file. In-memory store when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub cache_ttl_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { cache_ttl_ms: 60_000 }
    }
}

impl MetricsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Seed the built-in strategies when no definitions are configured.
    pub seed_defaults: bool,
    /// Failures handed to a `regenerate` handler.
    pub recent_failure_limit: usize,
    /// Invocations handed to a `learn` handler.
    pub learning_sample_limit: usize,
    /// Alternatives kept in a fallback chain.
    pub fallback_candidates: usize,
    pub definitions: Vec<StrategyDefinition>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            seed_defaults: true,
            recent_failure_limit: 10,
            learning_sample_limit: 50,
            fallback_candidates: 3,
            definitions: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::types::{ActionKind, CompareOp, Direction, MetricField, Trigger};

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.metrics.cache_ttl(), Duration::from_secs(60));
        assert!(c.strategy.seed_defaults);
        assert_eq!(c.strategy.recent_failure_limit, 10);
        assert_eq!(c.strategy.learning_sample_limit, 50);
        assert_eq!(c.strategy.fallback_candidates, 3);
        assert!(c.store.path.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let c = Config::from_toml_str(
            r#"
            log_filter = "warn"

            [store]
            path = "/tmp/tw.db"

            [metrics]
            cache_ttl_ms = 500

            [strategy]
            seed_defaults = false

            [[strategy.definitions]]
            name = "p99"
            kind = "performance"
            priority = 1
            trigger = { type = "threshold", metric = "p99_latency", threshold = 8000.0, direction = "above" }
            action = { type = "optimize", params = { focus = "latency" } }
            conditions = [{ metric = "total_invocations", op = "gte", value = 50.0 }]

            [[strategy.definitions]]
            name = "flaky"
            kind = "quality"
            trigger = { type = "pattern", pattern = "inconsistent_results" }
            action = { type = "notify" }
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(c.log_filter.as_deref(), Some("warn"));
        assert_eq!(c.store.path, Some(PathBuf::from("/tmp/tw.db")));
        assert_eq!(c.metrics.cache_ttl_ms, 500);
        assert!(!c.strategy.seed_defaults);
        assert_eq!(c.strategy.recent_failure_limit, 10);

        let defs = &c.strategy.definitions;
        assert_eq!(defs.len(), 2);
        assert_eq!(
            defs[0].trigger,
            Trigger::threshold(MetricField::P99Latency, 8000.0, Direction::Above)
        );
        assert_eq!(defs[0].action.kind, ActionKind::Optimize);
        assert_eq!(defs[0].action.params["focus"], "latency");
        assert_eq!(defs[0].conditions[0].op, CompareOp::Gte);
        assert!(defs[0].enabled);
        assert!(!defs[1].enabled);
        assert_eq!(defs[1].priority, 0);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = Config::from_toml_str("metrics = 3").unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
