//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence. Otherwise the crate logs at `info`, or at
/// `debug` when `verbose` is set. Later calls are no-ops.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_names(true),
            )
            .with(filter)
            .try_init();
    });
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "deprecated_usage=debug,warn"
    } else {
        "deprecated_usage=info,warn"
    }
}
