//! Process-wide logging
//!
//! Records outside of a session (argument parsing, definition loading) go to
//! stderr at the level selected by `-v`. Inside a session the scoped
//! `SessionLogging` subscriber takes over.

use crate::app::config::InstallerConfig;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process
pub fn init_logging(config: &InstallerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level()));

    // A second initialization (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(config.verbose >= 2)
        .with_line_number(config.verbose >= 3)
        .try_init();

    debug!("dk-installer started with verbosity level: {}", config.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}
