//! Tracing subscriber setup for the `cvsload` binary.
//!
//! Logs go to stderr. `RUST_LOG`, when set and valid, replaces the
//! `[logging].filter` directive from the config file.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

fn build_filter(config: &LoggingConfig, env: Option<&str>) -> EnvFilter {
    if let Some(directives) = env.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(config, env.as_deref());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}
