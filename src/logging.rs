//! Tracing setup for hosts and tests.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Installs a stderr `fmt` subscriber once per process.
///
/// `RUST_LOG` wins over `default_filter` when set. Later calls, and calls made
/// after the host installed its own subscriber, do nothing.
pub fn init(default_filter: &str) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}
