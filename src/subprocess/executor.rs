use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::drain::{ArtifactWriter, LineDrain, ProcessHandle};
use super::error::{CommandFailure, FailureKind, ProcessError};
use super::runner::{
    BoxedReader, BoxedWriter, CaptureMode, ExitStatus, ProcessCommand, ProcessRunner,
};
use super::{InvocationIndex, StreamName};
use crate::console::Console;
use crate::session::Session;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Default pause between liveness checks while draining output
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of running a command under a capture mode
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    None,
    Text(String),
    Json(Value),
    JsonLines(Vec<Value>),
}

impl CommandOutput {
    pub fn into_text(self) -> Option<String> {
        match self {
            CommandOutput::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            CommandOutput::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json_lines(self) -> Option<Vec<Value>> {
        match self {
            CommandOutput::JsonLines(values) => Some(values),
            _ => None,
        }
    }
}

/// Issues external commands on behalf of a session
///
/// Every command gets the next invocation index of the session, has both
/// output streams mirrored into artifact files, and is summarized with one
/// log record once it completes.
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn ProcessRunner>,
    session: Arc<Session>,
    console: Console,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, session: Arc<Session>, console: Console) -> Self {
        Self {
            runner,
            session,
            console,
            cancel: CancellationToken::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Launch a command and hand out live views of its output
    ///
    /// The caller consumes the streams as it sees fit and must end the
    /// invocation with [`RunningCommand::finish`] or [`RunningCommand::fail`].
    /// Once processing was interrupted no new process is launched.
    pub async fn start(&self, command: ProcessCommand) -> Result<RunningCommand, CommandFailure> {
        let started = Instant::now();
        let index = self.session.next_invocation_index();
        let command_line = command.command_line();

        if self.cancel.is_cancelled() {
            info!("Command [{:04}] [{}] not started, processing was interrupted", index, command_line);
            return Err(CommandFailure::from_process_error(
                index,
                command_line,
                None,
                ProcessError::Interrupted,
            ));
        }

        debug!("Command [{:04}]: [{}]", index, command_line);
        if !command.env.is_empty() {
            let keys = command.env.keys().cloned().collect::<Vec<_>>();
            debug!("Command [{:04}] extra ENV: [{}]", index, keys.join(", "));
        }

        let spawned = match self.runner.spawn(&command).await {
            Ok(spawned) => spawned,
            Err(e) => {
                if matches!(e, ProcessError::CommandNotFound(_)) {
                    error!("Command [{:04}] failed to find the executable", index);
                } else {
                    error!("Command [{:04}] could not be started: {}", index, e);
                }
                return Err(CommandFailure::from_process_error(
                    index,
                    command_line,
                    None,
                    e,
                ));
            }
        };

        let process = ProcessHandle::monitor(spawned.child);
        let drain = |stream: StreamName, source: BoxedReader| {
            LineDrain::new(
                stream,
                source,
                process.clone(),
                ArtifactWriter::new(self.session.artifact_path(index, stream, &command_line)),
                self.poll_interval,
                self.cancel.clone(),
            )
        };
        let stdout = drain(StreamName::Stdout, spawned.stdout);
        let stderr = drain(StreamName::Stderr, spawned.stderr);

        let running = RunningCommand {
            index,
            command_line,
            started,
            raise_on_non_zero: command.raise_on_non_zero,
            process,
            stdout,
            stderr,
            finished: false,
        };

        if let Err(e) = Self::feed_input(spawned.stdin, command.stdin.as_deref()).await {
            error!("Command [{:04}] could not receive its input: {}", running.index, e);
            running.terminate().await;
            return Err(running.fail(ProcessError::Stdin(e)).await);
        }

        Ok(running)
    }

    /// Write the input payload, then close the process input
    async fn feed_input(stdin: Option<BoxedWriter>, input: Option<&str>) -> std::io::Result<()> {
        let (Some(mut stdin), Some(input)) = (stdin, input) else {
            return Ok(());
        };
        match stdin.write_all(input.as_bytes()).await {
            Ok(()) => stdin.shutdown().await,
            // The process exited without reading its input
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                warn!("Process closed its input before reading it: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run a command to completion, consuming its output per its capture mode
    pub async fn run(&self, command: ProcessCommand) -> Result<CommandOutput, CommandFailure> {
        let capture = command.capture;
        let mut running = self.start(command).await?;

        match self.consume(&mut running, capture).await {
            Ok(output) => {
                running.finish().await?;
                Ok(output)
            }
            Err(e) => Err(running.fail(e).await),
        }
    }

    async fn consume(
        &self,
        running: &mut RunningCommand,
        capture: CaptureMode,
    ) -> Result<CommandOutput, ProcessError> {
        let stdout = running.stdout();
        match capture {
            CaptureMode::None => {
                stdout.drain().await?;
                Ok(CommandOutput::None)
            }
            CaptureMode::Echo => {
                while let Some(line) = stdout.next_line().await? {
                    let line = line.trim();
                    if !line.is_empty() {
                        self.console.msg(line);
                    }
                }
                Ok(CommandOutput::None)
            }
            CaptureMode::Text => Ok(CommandOutput::Text(stdout.collect_lines().await?.concat())),
            CaptureMode::Json => {
                let text = stdout.collect_lines().await?.concat();
                let value = serde_json::from_str(&text).unwrap_or_else(|e| {
                    warn!("Error decoding JSON from stdout: {}", e);
                    Value::Object(serde_json::Map::new())
                });
                Ok(CommandOutput::Json(value))
            }
            CaptureMode::JsonLines => {
                let mut values: Vec<Value> = Vec::new();
                let mut line_number = 0;
                while let Some(line) = stdout.next_line().await? {
                    match serde_json::from_str(&line) {
                        Ok(value) => values.push(value),
                        Err(_) => warn!("Error decoding JSON from stdout line #{}", line_number),
                    }
                    line_number += 1;
                }
                Ok(CommandOutput::JsonLines(values))
            }
        }
    }

    /// Run a command with a time limit, retrying failed attempts
    ///
    /// Stops at the first successful attempt. A timed-out attempt is
    /// terminated and counts as failed. When every attempt failed, the last
    /// failure is returned if it was a timeout or the command raises on
    /// non-zero exit codes; otherwise the command is considered done.
    pub async fn run_with_retries(
        &self,
        command: ProcessCommand,
        timeout: Duration,
        retries: u32,
    ) -> Result<(), CommandFailure> {
        let raise_on_non_zero = command.raise_on_non_zero;
        let mut attempt_command = command;
        attempt_command.raise_on_non_zero = true;

        let mut last_failure = None;
        for remaining in (0..retries).rev() {
            match self.attempt(attempt_command.clone(), timeout, remaining).await {
                Ok(()) => return Ok(()),
                Err(failure) if failure.kind == FailureKind::Interrupted => return Err(failure),
                Err(failure) => last_failure = Some(failure),
            }
        }

        match last_failure {
            Some(failure) if failure.is_timeout() || raise_on_non_zero => Err(failure),
            Some(failure) => {
                debug!("Ignoring failure after all attempts: {}", failure);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn attempt(
        &self,
        command: ProcessCommand,
        timeout: Duration,
        remaining: u32,
    ) -> Result<(), CommandFailure> {
        let running = self.start(command).await?;

        let waited = tokio::select! {
            waited = running.process.wait_timeout(timeout) => waited,
            _ = self.cancel.cancelled() => {
                running.terminate().await;
                return Err(running.fail(ProcessError::Interrupted).await);
            }
        };

        match waited {
            Ok(Some(_)) => running.finish().await.map(|_| ()),
            Ok(None) => {
                warn!("Command timed out. [{}] remaining attempts", remaining);
                running.terminate().await;
                Err(running.fail(ProcessError::Timeout(timeout)).await)
            }
            Err(e) => Err(running.fail(e).await),
        }
    }
}

/// A launched command whose output is still being consumed
pub struct RunningCommand {
    index: InvocationIndex,
    command_line: String,
    started: Instant,
    raise_on_non_zero: bool,
    process: ProcessHandle,
    stdout: LineDrain,
    stderr: LineDrain,
    finished: bool,
}

impl RunningCommand {
    pub fn index(&self) -> InvocationIndex {
        self.index
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn is_running(&self) -> bool {
        !self.process.has_exited()
    }

    pub fn stdout(&mut self) -> &mut LineDrain {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut LineDrain {
        &mut self.stderr
    }

    /// Both streams at once, for consuming them concurrently
    pub fn streams(&mut self) -> (&mut LineDrain, &mut LineDrain) {
        (&mut self.stdout, &mut self.stderr)
    }

    /// Wait up to `timeout` for the process; `None` means it is still running
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Option<ExitStatus>, ProcessError> {
        self.process.wait_timeout(timeout).await
    }

    /// Kill the process and wait until it is gone
    pub async fn terminate(&self) {
        self.process.kill();
        if let Err(e) = self.process.wait().await {
            warn!("Command [{:04}] could not be terminated: {}", self.index, e);
        }
    }

    /// Drain the remaining output, wait for exit and check the exit code
    pub async fn finish(self) -> Result<ExitStatus, CommandFailure> {
        self.complete(None).await
    }

    /// End the invocation because the consuming code failed with `error`
    ///
    /// The remaining output is still drained and the process awaited, so the
    /// returned failure carries the exit code with `error` as its cause.
    pub async fn fail(self, error: impl Into<BoxedError>) -> CommandFailure {
        let index = self.index;
        let command_line = self.command_line.clone();
        match self.complete(Some(error.into())).await {
            Err(failure) => failure,
            Ok(status) => CommandFailure::new(
                index,
                command_line,
                Some(status.return_code()),
                FailureKind::Consumer,
            ),
        }
    }

    async fn complete(mut self, consumer_error: Option<BoxedError>) -> Result<ExitStatus, CommandFailure> {
        self.finished = true;

        let mut drain_error = None;
        for drain in [&mut self.stdout, &mut self.stderr] {
            if let Err(e) = drain.drain().await {
                if matches!(e, ProcessError::Interrupted) {
                    self.process.kill();
                }
                drain_error.get_or_insert(e);
            }
            if let Err(e) = drain.flush() {
                warn!("Could not flush {} artifact: {}", drain.stream(), e);
            }
        }

        let status = match self.process.wait().await {
            Ok(status) => status,
            Err(e) => {
                let failure = CommandFailure::from_process_error(
                    self.index,
                    self.command_line.clone(),
                    None,
                    e,
                );
                self.log_summary(None);
                return Err(failure);
            }
        };
        let code = status.return_code();
        self.log_summary(Some(code));

        let failure = if let Some(error) = consumer_error {
            Some(self.wrap_error(code, error))
        } else if let Some(error) = drain_error {
            Some(CommandFailure::from_process_error(
                self.index,
                self.command_line.clone(),
                Some(code),
                error,
            ))
        } else if self.raise_on_non_zero {
            status.as_error().map(|error| {
                CommandFailure::from_process_error(
                    self.index,
                    self.command_line.clone(),
                    Some(code),
                    error,
                )
            })
        } else {
            None
        };

        match failure {
            Some(failure) => Err(failure),
            None => Ok(status),
        }
    }

    fn wrap_error(&self, code: i32, error: BoxedError) -> CommandFailure {
        match error.downcast::<ProcessError>() {
            Ok(process_error) => CommandFailure::from_process_error(
                self.index,
                self.command_line.clone(),
                Some(code),
                *process_error,
            ),
            Err(other) => CommandFailure::new(
                self.index,
                self.command_line.clone(),
                Some(code),
                FailureKind::Consumer,
            )
            .with_source(other),
        }
    }

    fn log_summary(&self, code: Option<i32>) {
        let elapsed = self.started.elapsed().as_secs_f64();
        info!(
            "Command [{:04}] returned [{}] in [{:.3}] seconds. [{}] bytes in STDOUT, [{}] bytes in STDERR",
            self.index,
            code.map_or_else(|| "none".to_string(), |c| c.to_string()),
            elapsed,
            self.stdout.bytes_written(),
            self.stderr.bytes_written(),
        );
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Command [{:04}] dropped before completion, terminating it",
                self.index
            );
            self.process.kill();
        }
    }
}
