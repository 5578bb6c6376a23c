//! Error handling utilities
//!
//! Reporting for errors that happen before or outside of a session.

use tracing::error;

use crate::error::{InstallerError, EXIT_ABORTED, EXIT_UNEXPECTED};

/// Print a fatal error and compute the exit status for it
///
/// `InstallerError`s show their user message, and the full causal chain in
/// verbose mode. Anything else is an unexpected failure.
pub fn report_fatal_error(error: &anyhow::Error, verbose: u8) -> i32 {
    error!("Fatal error: {:#}", error);

    if let Some(installer_err) = error.downcast_ref::<InstallerError>() {
        eprintln!("{}", installer_err.user_message());
        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", installer_err.developer_message());
        }
        return installer_err.exit_code();
    }

    eprintln!("Error: {error}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    if error.chain().any(|cause| {
        cause
            .downcast_ref::<InstallerError>()
            .is_some_and(InstallerError::is_abort)
    }) {
        EXIT_ABORTED
    } else {
        EXIT_UNEXPECTED
    }
}

/// Handle fatal errors and exit with the matching status code
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    std::process::exit(report_fatal_error(&error, verbose))
}
