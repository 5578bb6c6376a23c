//! Application module
//!
//! Application-level glue around the engine:
//! - Configuration handling
//! - Logging setup
//! - Fatal error reporting

pub mod config;
pub mod error_handling;
pub mod logging;

pub use config::{default_logs_root, InstallerConfig, LOGS_DIR_ENV};
pub use error_handling::{handle_fatal_error, report_fatal_error};
pub use logging::init_logging;
