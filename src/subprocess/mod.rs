//! External process execution
//!
//! Everything the installer does to the outside world goes through this
//! module: a [`ProcessRunner`] launches processes, [`LineDrain`] turns their
//! output into live line sequences mirrored into session artifact files, and
//! [`CommandExecutor`] layers capture modes and retry policies on top.

pub mod builder;
pub mod drain;
pub mod error;
pub mod executor;
pub mod mock;
pub mod runner;

#[cfg(test)]
mod tests;

pub use builder::ProcessCommandBuilder;
pub use drain::{ArtifactWriter, LineDrain, ProcessHandle};
pub use error::{CommandFailure, FailureKind, ProcessError};
pub use executor::{CommandExecutor, CommandOutput, RunningCommand};
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{
    CaptureMode, ChildProcess, ExitStatus, ProcessCommand, ProcessRunner, SpawnedProcess,
    TokioProcessRunner,
};

/// Sequence number of a command within one session, starting at 1
pub type InvocationIndex = u32;

/// The two output streams of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
