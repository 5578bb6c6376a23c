use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::ProcessError;

/// How the standard output of a command is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Output is only mirrored into the artifact file
    #[default]
    None,
    /// Every non-empty line is echoed to the operator console
    Echo,
    /// Output is joined into one string
    Text,
    /// Output is parsed as a single JSON document
    Json,
    /// Every line is parsed as its own JSON document
    JsonLines,
}

/// One external command invocation, immutable once issued
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables layered over the inherited environment
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Payload written to the process input before it is closed
    pub stdin: Option<String>,
    pub capture: CaptureMode,
    pub raise_on_non_zero: bool,
}

impl ProcessCommand {
    /// The command as one space separated string, as shown in logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    /// Numeric return code, with signals reported as negative numbers
    pub fn return_code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Error(code) => *code,
            ExitStatus::Signal(signal) => -signal,
        }
    }

    /// The low-level error describing an unsuccessful status
    pub fn as_error(&self) -> Option<ProcessError> {
        match self {
            ExitStatus::Success => None,
            ExitStatus::Error(code) => Some(ProcessError::ExitCode(*code)),
            ExitStatus::Signal(signal) => Some(ProcessError::Signal(*signal)),
        }
    }
}

/// A launched process, abstracted so tests can script one
#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    fn start_kill(&mut self) -> Result<(), ProcessError>;
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handles to a process that was just started
pub struct SpawnedProcess {
    pub child: Box<dyn ChildProcess>,
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, command: &ProcessCommand) -> Result<SpawnedProcess, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Convert process exit status to our ExitStatus enum
    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    /// Parse signal status on Unix systems
    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    /// Log command execution details
    fn log_command_start(command: &ProcessCommand) {
        tracing::trace!("Spawning subprocess: {}", command.command_line());

        // Log argument sizes to help debug E2BIG errors
        let args_size: usize = command.args.iter().map(|s| s.len()).sum();
        if args_size > 10000 {
            tracing::warn!(
                "Large arguments detected: {} args, {} total bytes",
                command.args.len(),
                args_size
            );
        }

        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }

        if let Some(ref stdin) = command.stdin {
            tracing::trace!("Stdin provided: {} bytes", stdin.len());
        }
    }

    /// Configure the command with environment, working directory and pipes
    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);

        // Keep operator interrupts away from the child; the engine decides
        // when to terminate it
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);
        cmd.envs(&command.env);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Map spawn error to ProcessError
    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.command_line(),
                source: error,
            }
        }
    }

    /// Extract a stream from a child process, converting None to error
    fn extract_stream<T>(stream: Option<T>, stream_name: &str) -> Result<T, ProcessError> {
        stream.ok_or_else(|| {
            ProcessError::Io(std::io::Error::other(format!(
                "Failed to capture {}",
                stream_name
            )))
        })
    }
}

/// A real process spawned through tokio
pub struct TokioChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await?;
        Ok(TokioProcessRunner::parse_exit_status(status))
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // The process already exited and was reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ProcessError::Io(e)),
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(&self, command: &ProcessCommand) -> Result<SpawnedProcess, ProcessError> {
        Self::log_command_start(command);

        let mut cmd = Self::configure_command(command);
        let mut child = cmd.spawn().map_err(|e| {
            tracing::debug!(
                "Failed to spawn '{}': {:?} (kind: {:?})",
                command.program,
                e,
                e.kind()
            );
            Self::map_spawn_error(e, command)
        })?;

        let stdin = child.stdin.take().map(|s| Box::new(s) as BoxedWriter);
        let stdout = Self::extract_stream(child.stdout.take(), "stdout")?;
        let stderr = Self::extract_stream(child.stderr.take(), "stderr")?;

        Ok(SpawnedProcess {
            child: Box::new(TokioChild { child }),
            stdin,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }
}
