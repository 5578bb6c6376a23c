use std::fmt::Display;
use thiserror::Error;

pub mod codes;


pub use crate::subprocess::error::{CommandFailure, FailureKind};
pub use codes::{describe_error_code, ErrorCode};

/// Process exit status for a workflow that completed successfully
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit status for a handled, operator-actionable failure
pub const EXIT_ABORTED: i32 = 1;
/// Process exit status for an unexpected failure that needs escalation
pub const EXIT_UNEXPECTED: i32 = 2;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The unified error type for the installer engine
///
/// `Abort` means the root cause was identified and already reported to the
/// operator. `Defect` means the installer could not continue and the cause
/// was not actionable. `Command` is a single failed external command and
/// `Other` is any other step failure.
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("[E{code:04}] {message}")]
    Abort {
        code: u16,
        message: String,
        step: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] {message}")]
    Defect {
        code: u16,
        message: String,
        step: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error(transparent)]
    Command(#[from] CommandFailure),

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl InstallerError {
    /// Create an aborting error with default code
    pub fn abort(message: impl Into<String>) -> Self {
        Self::abort_with_code(ErrorCode::WORKFLOW_GENERIC, message)
    }

    /// Create an aborting error with specific code
    pub fn abort_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Abort {
            code,
            message: message.into(),
            step: None,
            source: None,
        }
    }

    /// Create an unexpected-failure error with default code
    pub fn defect(message: impl Into<String>) -> Self {
        Self::defect_with_code(ErrorCode::OTHER_UNEXPECTED, message)
    }

    /// Create an unexpected-failure error with specific code
    pub fn defect_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Defect {
            code,
            message: message.into(),
            step: None,
            source: None,
        }
    }

    /// Create a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::other_with_code(ErrorCode::OTHER_GENERIC, message)
    }

    pub fn other_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Other {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    ///
    /// Command failures keep their own cause, so the source is only attached
    /// when it is still empty.
    pub fn with_source(mut self, source: impl Into<BoxedSource>) -> Self {
        match &mut self {
            Self::Abort { source: src, .. }
            | Self::Defect { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::Command(failure) => failure.attach_source(source.into()),
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Abort { message, .. }
            | Self::Defect { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
            Self::Command(_) => {}
        }
        self
    }

    /// Record which workflow step produced this error
    pub fn with_step(mut self, step_label: impl Into<String>) -> Self {
        if let Self::Abort { step, .. } | Self::Defect { step, .. } = &mut self {
            *step = Some(step_label.into());
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Abort { code, .. } | Self::Defect { code, .. } | Self::Other { code, .. } => {
                *code
            }
            Self::Command(failure) => failure.code(),
        }
    }

    /// Get the process exit status for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_abort() {
            EXIT_ABORTED
        } else {
            EXIT_UNEXPECTED
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort { .. })
    }

    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Defect { .. })
    }

    /// The label of the workflow step this error is attributed to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Abort { step, .. } | Self::Defect { step, .. } => step.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Abort { message, step, .. } | Self::Defect { message, step, .. } => {
                match step {
                    Some(s) => format!("{} (step '{}')", message, s),
                    None => message.clone(),
                }
            }
            Self::Command(failure) => failure.to_string(),
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// Get a developer-friendly error message with the full causal chain
    pub fn developer_message(&self) -> String {
        let mut lines = vec![self.to_string()];
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            lines.push(format!("caused by: {}", cause));
            current = cause.source();
        }
        lines.join("\n")
    }

    /// The first command failure found along this error's causal chain
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        find_command_failure(self)
    }
}

/// Walk an error's causal chain looking for the first `CommandFailure`
///
/// Works on any `std::error::Error`, including the items of
/// `anyhow::Error::chain()`.
pub fn find_command_failure<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a CommandFailure> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(failure) = err.downcast_ref::<CommandFailure>() {
            return Some(failure);
        }
        if let Some(InstallerError::Command(failure)) = err.downcast_ref::<InstallerError>() {
            return Some(failure);
        }
        current = err.source();
    }
    None
}

/// Type alias for Results using InstallerError
pub type Result<T> = std::result::Result<T, InstallerError>;

impl From<std::io::Error> for InstallerError {
    fn from(err: std::io::Error) -> Self {
        InstallerError::other_with_code(ErrorCode::OTHER_INTERNAL_ERROR, "IO operation failed")
            .with_source(err)
    }
}

impl From<serde_yaml::Error> for InstallerError {
    fn from(err: serde_yaml::Error) -> Self {
        InstallerError::other_with_code(ErrorCode::CONFIG_INVALID_YAML, "Invalid YAML syntax")
            .with_source(err)
    }
}

impl From<serde_json::Error> for InstallerError {
    fn from(err: serde_json::Error) -> Self {
        InstallerError::other_with_code(ErrorCode::CONFIG_INVALID_JSON, "Invalid JSON syntax")
            .with_source(err)
    }
}
