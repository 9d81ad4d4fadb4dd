//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Default filter directives.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "bqgate=debug,bqgate_auth=debug,bqgate_mcp=debug"
    } else {
        "bqgate=info,bqgate_auth=info,bqgate_mcp=info"
    }
}

/// Initialize logging to stderr. `RUST_LOG` takes precedence over the
/// verbosity flag.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
