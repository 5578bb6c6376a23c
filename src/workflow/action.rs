use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::console::Console;
use crate::session::Session;
use crate::subprocess::{
    CommandExecutor, CommandFailure, CommandOutput, ProcessCommand, ProcessRunner, RunningCommand,
};

/// Context shared with every step of a workflow run
///
/// Bundles the session, the command executor bound to it and the operator
/// console.
#[derive(Clone)]
pub struct Action {
    name: String,
    executor: CommandExecutor,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
        session: Arc<Session>,
        console: Console,
    ) -> Self {
        Self {
            name: name.into(),
            executor: CommandExecutor::new(runner, session, console),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(cancel);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.executor = self.executor.with_poll_interval(poll_interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Session {
        self.executor.session()
    }

    pub fn console(&self) -> &Console {
        self.executor.console()
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn is_interrupted(&self) -> bool {
        self.executor.cancellation().is_cancelled()
    }

    pub async fn start_cmd(&self, command: ProcessCommand) -> Result<RunningCommand, CommandFailure> {
        self.executor.start(command).await
    }

    pub async fn run_cmd(&self, command: ProcessCommand) -> Result<CommandOutput, CommandFailure> {
        self.executor.run(command).await
    }

    pub async fn run_cmd_retries(
        &self,
        command: ProcessCommand,
        timeout: Duration,
        retries: u32,
    ) -> Result<(), CommandFailure> {
        self.executor.run_with_retries(command, timeout, retries).await
    }
}
