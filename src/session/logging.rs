use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use super::Session;
use crate::error::{ErrorCode, InstallerError, Result};

/// Session-scoped log routing
///
/// While alive, every record at DEBUG and above goes to the session's
/// `installer_log.txt`, and to stderr as well in debug mode. Dropping it
/// flushes the file and detaches the routing.
pub struct SessionLogging {
    file: Arc<File>,
    path: PathBuf,
    _guard: DefaultGuard,
}

impl SessionLogging {
    pub fn configure(session: &Session, debug: bool) -> Result<Self> {
        Self::to_file(&session.log_file_path(), debug)
    }

    pub fn to_file(path: &Path, debug: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                InstallerError::other_with_code(
                    ErrorCode::SESSION_LOGGING_FAILED,
                    format!("Could not open log file {}", path.display()),
                )
                .with_source(e)
            })?;
        let file = Arc::new(file);

        let file_layer = fmt::layer()
            .with_writer(Arc::clone(&file))
            .with_ansi(false)
            .with_target(false);

        let console_layer = debug.then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
        });

        let subscriber = tracing_subscriber::registry()
            .with(LevelFilter::DEBUG)
            .with(file_layer)
            .with(console_layer);

        let guard = tracing::subscriber::set_default(subscriber);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLogging {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
    }
}
