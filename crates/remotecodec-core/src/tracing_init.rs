//! Logging setup for the `remotecodec` binary.
//!
//! Log lines go to stderr, filtered by `RUST_LOG` when it is set and by the
//! configured level across every workspace crate otherwise.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global subscriber described by `logging`.
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(rust_log.as_deref(), &logging.level)?;

    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if logging.json {
        registry.with(fmt.json()).try_init()
    } else {
        registry.with(fmt).try_init()
    };
    installed.map_err(|e| Error::Config(format!("Failed to install log subscriber: {e}")))
}

/// Default filter covering every workspace crate at `level`.
pub fn default_filter(level: &str) -> String {
    ["remotecodec", "remotecodec_core", "remotecodec_host", "remotecodec_proxy"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(rust_log: Option<&str>, level: &str) -> Result<EnvFilter> {
    let directives = match rust_log.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => default_filter(level),
    };
    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter {directives:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_lists_all_crates() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("remotecodec=debug,"));
        assert!(filter.contains("remotecodec_host=debug"));
        assert!(filter.contains("remotecodec_proxy=debug"));
    }

    #[test]
    fn rust_log_wins_over_level() {
        let filter = env_filter(Some("remotecodec_proxy=trace"), "warn").unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("remotecodec_proxy=trace"));
        assert!(!rendered.contains("remotecodec_host"));
    }

    #[test]
    fn blank_rust_log_falls_back_to_level() {
        let filter = env_filter(Some("  "), "debug").unwrap();
        assert!(filter.to_string().contains("remotecodec_core=debug"));
    }

    #[test]
    fn unknown_level_is_config_error() {
        assert!(matches!(
            env_filter(None, "chatty"),
            Err(Error::Config(_))
        ));
    }
}
