//! Logging setup for the `dbdrive` binary.
//!
//! Logs go to stderr so stdout carries only JSON envelopes. `RUST_LOG`
//! overrides the level chosen from the command line flags.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::{DbDriveError, Result};

/// Level for the `-v` count and `-q` flag (0=INFO, 1=DEBUG, 2+=TRACE, quiet=ERROR)
#[must_use]
pub const fn level_for(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Install the global subscriber
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let default_directive = format!("dbdrive={}", level_for(verbose, quiet));
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directive))
        .map_err(|e| DbDriveError::config_error(format!("Invalid log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| DbDriveError::config_error(format!("Failed to initialize logging: {e}")))
}
