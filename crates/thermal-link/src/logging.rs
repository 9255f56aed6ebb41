//! Diagnostic logging bootstrap.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` takes precedence; otherwise
/// `debug` enables debug-level output and `false` silences the library.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "off" }
}
