//! Logging setup for the `wrds` binary.
//!
//! Logs go to stderr so stdout stays reserved for JSON output. `RUST_LOG`, when set, overrides
//! the level chosen from the command-line flags.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, WrdsError};

/// Map `-v` / `-q` flags to a level (0=WARN, 1=INFO, 2=DEBUG, 3+=TRACE; quiet=ERROR)
#[must_use]
pub const fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::WARN,
        (false, 1) => tracing::Level::INFO,
        (false, 2) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Install the global stderr subscriber
///
/// Can only succeed once per process.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,wrds={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| WrdsError::invalid_input(format!("Failed to initialize logging: {e}")))?;

    Ok(())
}
