use crate::error::ErrorCode;
use std::fmt;
use std::time::Duration;

use super::InvocationIndex;

/// Low-level failure of a single process interaction
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process exited with code {0}")]
    ExitCode(i32),

    #[error("Process terminated by signal {0}")]
    Signal(i32),

    #[error("Processing interrupted by the operator")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not write the process input: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

/// Why a command did not complete as expected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The executable could not be found
    NotFound,
    /// The process could not be launched for another reason
    Spawn,
    /// The process exited with a non-zero code
    ExitCode,
    /// The process was terminated by a signal
    Signal,
    /// The process did not finish within the allowed time
    Timeout,
    /// The operator interrupted the command
    Interrupted,
    /// The code consuming the command output failed
    Consumer,
    /// Reading or writing the process streams failed
    Io,
    /// The input payload could not be handed to the process
    Stdin,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::NotFound => "executable not found",
            FailureKind::Spawn => "failed to start",
            FailureKind::ExitCode => "exited with a non-zero code",
            FailureKind::Signal => "was terminated by a signal",
            FailureKind::Timeout => "timed out",
            FailureKind::Interrupted => "was interrupted",
            FailureKind::Consumer => "output processing failed",
            FailureKind::Io => "stream IO failed",
            FailureKind::Stdin => "did not accept its input",
        };
        f.write_str(text)
    }
}

fn describe_outcome(kind: &FailureKind, exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("{} (returned [{}])", kind, code),
        None => kind.to_string(),
    }
}

/// One external command that did not complete as expected
///
/// Carries the invocation index assigned by the session, the rendered
/// command line and the exit code when the process got far enough to have
/// one. Every wrapping layer keeps the original error as `source`.
#[derive(Debug, thiserror::Error)]
#[error("Command [{:04}] [{}] {}", .index, .command, describe_outcome(.kind, .exit_code))]
pub struct CommandFailure {
    pub index: InvocationIndex,
    pub command: String,
    pub exit_code: Option<i32>,
    pub kind: FailureKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CommandFailure {
    pub fn new(
        index: InvocationIndex,
        command: impl Into<String>,
        exit_code: Option<i32>,
        kind: FailureKind,
    ) -> Self {
        Self {
            index,
            command: command.into(),
            exit_code,
            kind,
            source: None,
        }
    }

    /// Build a failure from a low-level process error, keeping it as cause
    pub fn from_process_error(
        index: InvocationIndex,
        command: impl Into<String>,
        exit_code: Option<i32>,
        error: ProcessError,
    ) -> Self {
        let kind = match &error {
            ProcessError::CommandNotFound(_) => FailureKind::NotFound,
            ProcessError::SpawnFailed { .. } => FailureKind::Spawn,
            ProcessError::Timeout(_) => FailureKind::Timeout,
            ProcessError::ExitCode(_) => FailureKind::ExitCode,
            ProcessError::Signal(_) => FailureKind::Signal,
            ProcessError::Interrupted => FailureKind::Interrupted,
            ProcessError::Io(_) | ProcessError::MockExpectationNotMet(_) => FailureKind::Io,
            ProcessError::Stdin(_) => FailureKind::Stdin,
        };
        Self::new(index, command, exit_code, kind).with_source(error)
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a cause only when none is recorded yet
    pub(crate) fn attach_source(&mut self, source: Box<dyn std::error::Error + Send + Sync>) {
        if self.source.is_none() {
            self.source = Some(source);
        }
    }

    /// Registry code matching the failure kind
    pub fn code(&self) -> u16 {
        match self.kind {
            FailureKind::NotFound => ErrorCode::EXEC_COMMAND_NOT_FOUND,
            FailureKind::Spawn => ErrorCode::EXEC_SPAWN_FAILED,
            FailureKind::ExitCode => ErrorCode::EXEC_SUBPROCESS_FAILED,
            FailureKind::Signal => ErrorCode::EXEC_SIGNAL_RECEIVED,
            FailureKind::Timeout => ErrorCode::EXEC_TIMEOUT,
            FailureKind::Interrupted => ErrorCode::EXEC_INTERRUPTED,
            FailureKind::Consumer => ErrorCode::EXEC_CONSUMER_FAILED,
            FailureKind::Io => ErrorCode::EXEC_OUTPUT_ERROR,
            FailureKind::Stdin => ErrorCode::EXEC_STDIN_ERROR,
        }
    }

    /// True when this failure, or anything it wraps, is a timeout
    pub fn is_timeout(&self) -> bool {
        if self.kind == FailureKind::Timeout {
            return true;
        }
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            if matches!(cause.downcast_ref::<ProcessError>(), Some(ProcessError::Timeout(_))) {
                return true;
            }
            if let Some(inner) = cause.downcast_ref::<CommandFailure>() {
                if inner.kind == FailureKind::Timeout {
                    return true;
                }
            }
            current = cause.source();
        }
        false
    }
}
