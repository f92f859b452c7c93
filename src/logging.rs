//! Tracing subscriber setup
//!
//! Logs always go to stderr: with the stdio transport a gateway shares our
//! process tree, and stdout of the CLI carries JSON results.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Install the global subscriber at `level`; `RUST_LOG` takes precedence
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
