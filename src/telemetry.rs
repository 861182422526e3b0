//! Logging setup for the binaries.

use tracing_subscriber::EnvFilter;

/// Install a compact `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` overrides `default_filter`. Calling this twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
