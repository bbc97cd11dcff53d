// Tracing setup
//
// RUST_LOG wins when set; otherwise `info` (or `debug` with --verbose)
// for both the crate and its dependencies.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when RUST_LOG is unset
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,snippy=debug,tower_http=debug"
    } else {
        "info,snippy=info"
    }
}

/// Install the global subscriber. Safe to call once per process.
pub fn init(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_enables_debug() {
        assert!(default_filter(true).contains("snippy=debug"));
        assert!(!default_filter(false).contains("debug"));
    }

    #[test]
    fn test_filters_parse() {
        assert!(EnvFilter::try_new(default_filter(true)).is_ok());
        assert!(EnvFilter::try_new(default_filter(false)).is_ok());
    }
}
