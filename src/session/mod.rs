//! Per-run session folder
//!
//! Every installer run gets a timestamped folder under the logs root. All
//! command artifacts and the engine log live there while the run is in
//! progress; when the session ends the folder is packed into a zip archive,
//! removed, and the `latest` alias is pointed at the new archive.

pub mod logging;

#[cfg(test)]
mod tests;

pub use logging::SessionLogging;

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zip::write::{FileOptions, ZipWriter};

use crate::error::{find_command_failure, ErrorCode, InstallerError, Result};
use crate::subprocess::{InvocationIndex, StreamName};

/// Name of the engine log file inside the session folder
pub const LOG_FILE_NAME: &str = "installer_log.txt";

/// Alias in the logs root that always points to the most recent archive
pub const LATEST_ALIAS: &str = "latest";

const SLUG_MAX_LEN: usize = 100;

static NON_LETTERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z]+").expect("Valid regex pattern"));

/// Filesystem-safe short form of a command line
///
/// Every run of non-letters becomes a single dash, the result is cut at 100
/// characters and stripped of leading and trailing dashes.
pub fn command_slug(command_line: &str) -> String {
    let replaced = NON_LETTERS.replace_all(command_line, "-");
    // Only ASCII remains after the replacement, so slicing by byte is safe
    let truncated = &replaced[..replaced.len().min(SLUG_MAX_LEN)];
    truncated.trim_matches('-').to_string()
}

/// Name of the artifact file for one stream of one command
pub fn artifact_file_name(
    index: InvocationIndex,
    stream: StreamName,
    command_line: &str,
) -> String {
    format!("{:04}-{}-{}.txt", index, stream, command_slug(command_line))
}

/// Captured output of the command behind a failure
#[derive(Debug, Clone)]
pub struct FailureArtifact {
    pub index: InvocationIndex,
    pub command: String,
    pub stream: StreamName,
    pub path: PathBuf,
}

impl FailureArtifact {
    pub fn read(&self) -> io::Result<String> {
        fs::read(&self.path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// One installer run's folder of logs and command artifacts
#[derive(Debug)]
pub struct Session {
    logs_root: PathBuf,
    folder: PathBuf,
    name: String,
    next_index: AtomicU32,
    closed: AtomicBool,
}

impl Session {
    /// Create the session folder `<prefix>-<YYYYmmdd-HHMMSS>` under `logs_root`
    pub fn begin(logs_root: impl AsRef<Path>, prefix: &str) -> Result<SessionGuard> {
        let logs_root = logs_root.as_ref().to_path_buf();
        fs::create_dir_all(&logs_root).map_err(|e| {
            InstallerError::other_with_code(
                ErrorCode::SESSION_FOLDER_ERROR,
                format!("Could not create logs folder {}", logs_root.display()),
            )
            .with_source(e)
        })?;

        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let base_name = format!("{}-{}", prefix, timestamp);

        let mut name = base_name.clone();
        let mut attempt = 1;
        let folder = loop {
            let candidate = logs_root.join(&name);
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                    name = format!("{}-{}", base_name, attempt);
                }
                Err(e) => {
                    return Err(InstallerError::other_with_code(
                        ErrorCode::SESSION_FOLDER_ERROR,
                        format!("Could not create session folder {}", candidate.display()),
                    )
                    .with_source(e))
                }
            }
        };

        debug!("Session folder created at {}", folder.display());

        Ok(SessionGuard {
            session: Arc::new(Session {
                logs_root,
                folder,
                name,
                next_index: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn logs_root(&self) -> &Path {
        &self.logs_root
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.folder.join(LOG_FILE_NAME)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.logs_root.join(format!("{}.zip", self.name))
    }

    pub fn latest_path(&self) -> PathBuf {
        self.logs_root.join(LATEST_ALIAS)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reserve the next invocation index; the first command gets 1
    pub fn next_invocation_index(&self) -> InvocationIndex {
        self.next_index.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of commands issued so far
    pub fn invocation_count(&self) -> InvocationIndex {
        self.next_index.load(Ordering::SeqCst)
    }

    pub fn artifact_path(
        &self,
        index: InvocationIndex,
        stream: StreamName,
        command_line: &str,
    ) -> PathBuf {
        self.folder
            .join(artifact_file_name(index, stream, command_line))
    }

    /// Find the captured output of the command responsible for `error`
    ///
    /// The causal chain is searched for a command failure. Its stderr
    /// artifact is preferred, then its stdout one; an artifact is only used
    /// when exactly one file matches.
    pub fn locate_failure_artifact(
        &self,
        error: &(dyn std::error::Error + 'static),
    ) -> Option<FailureArtifact> {
        let failure = find_command_failure(error)?;
        [StreamName::Stderr, StreamName::Stdout]
            .into_iter()
            .find_map(|stream| {
                self.unique_artifact(failure.index, stream)
                    .map(|path| FailureArtifact {
                        index: failure.index,
                        command: failure.command.clone(),
                        stream,
                        path,
                    })
            })
    }

    fn unique_artifact(&self, index: InvocationIndex, stream: StreamName) -> Option<PathBuf> {
        let pattern = format!(
            "{}/{:04}-{}-*.txt",
            glob::Pattern::escape(&self.folder.to_string_lossy()),
            index,
            stream
        );
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(|entry| entry.ok()).collect::<Vec<_>>(),
            Err(e) => {
                warn!("Invalid artifact pattern {}: {}", pattern, e);
                return None;
            }
        };
        match <[PathBuf; 1]>::try_from(paths) {
            Ok([path]) => Some(path),
            Err(_) => None,
        }
    }

    /// Pack the folder into the archive, remove it and update the alias
    ///
    /// Runs at most once; later calls return the archive path without
    /// touching the filesystem.
    pub fn archive(&self) -> Result<PathBuf> {
        let archive_path = self.archive_path();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(archive_path);
        }

        let files = self.write_archive(&archive_path).map_err(|e| {
            InstallerError::other_with_code(
                ErrorCode::SESSION_ARCHIVE_FAILED,
                format!("Could not archive session folder {}", self.folder.display()),
            )
            .with_source(e)
        })?;

        // Files are removed only once the archive is complete
        for file in &files {
            fs::remove_file(file)?;
        }
        fs::remove_dir(&self.folder)?;

        self.update_latest_alias(&archive_path)?;
        info!("Session archived to {}", archive_path.display());
        Ok(archive_path)
    }

    fn write_archive(&self, archive_path: &Path) -> zip::result::ZipResult<Vec<PathBuf>> {
        let mut files = fs::read_dir(&self.folder)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();

        let mut zip = ZipWriter::new(File::create(archive_path)?);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for path in &files {
            let file_name = path.file_name().unwrap_or_default().to_string_lossy();
            zip.start_file(format!("{}/{}", self.name, file_name), options)?;
            zip.write_all(&fs::read(path)?)?;
        }

        zip.finish()?;
        Ok(files)
    }

    fn update_latest_alias(&self, archive_path: &Path) -> io::Result<()> {
        let latest = self.latest_path();
        if fs::symlink_metadata(&latest).is_ok() {
            fs::remove_file(&latest)?;
        }

        #[cfg(unix)]
        {
            let target = archive_path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| archive_path.to_path_buf());
            std::os::unix::fs::symlink(target, &latest)
        }

        #[cfg(not(unix))]
        {
            fs::copy(archive_path, &latest).map(|_| ())
        }
    }
}

/// Scoped ownership of a [`Session`]
///
/// The session is archived when [`SessionGuard::close`] is called, or when
/// the guard is dropped on any other exit path.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<Session>,
}

impl SessionGuard {
    /// Shared handle for components that write into the session
    pub fn handle(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    pub fn close(self) -> Result<PathBuf> {
        self.session.archive()
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.is_closed() {
            return;
        }
        if let Err(e) = self.session.archive() {
            error!("Failed to archive session {}: {}", self.session.name(), e);
        }
    }
}
