//! Structured logging setup.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Filter applied when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_FILTER: &str = "info,toolwatch=debug";

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins over `filter`, which wins over [`DEFAULT_FILTER`].
/// Returns false when a subscriber was already installed.
pub fn init(filter: Option<&str>) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .compact()
        .try_init()
        .is_ok()
}

/// [`init`] with the filter from `config.log_filter`.
pub fn init_from_config(config: &Config) -> bool {
    init(config.log_filter.as_deref())
}
