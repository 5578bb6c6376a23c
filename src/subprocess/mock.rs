use async_trait::async_trait;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::error::ProcessError;
use super::runner::{ChildProcess, ExitStatus, ProcessCommand, ProcessRunner, SpawnedProcess};

/// Scripted process runner for tests
///
/// Expectations are matched in registration order. One limited with
/// [`MockCommandConfig::times`] stops matching once used up, so a sequence of
/// attempts can be scripted by registering several expectations for the same
/// program.
#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

#[derive(Clone)]
struct MockResponse {
    status: ExitStatus,
    stdout: String,
    stderr: String,
    delay: Duration,
    hangs: bool,
    not_found: bool,
}

struct MockExpectation {
    program: String,
    #[allow(clippy::type_complexity)]
    args_matcher: Option<Box<dyn Fn(&[String]) -> bool + Send + Sync>>,
    response: MockResponse,
    times_called: usize,
    expected_times: Option<usize>,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: MockResponse {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    delay: Duration::ZERO,
                    hangs: false,
                    not_found: false,
                },
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = self.call_history.lock().unwrap();
        let count = history.iter().filter(|cmd| cmd.program == program).count();
        count == times
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.expectations.lock().unwrap().clear();
        self.call_history.lock().unwrap().clear();
    }

    fn next_response(&self, command: &ProcessCommand) -> Result<MockResponse, ProcessError> {
        let mut expectations = self.expectations.lock().unwrap();

        for expectation in expectations.iter_mut() {
            if expectation.program != command.program {
                continue;
            }

            if let Some(ref args_matcher) = expectation.args_matcher {
                if !(args_matcher)(&command.args) {
                    continue;
                }
            }

            if let Some(expected) = expectation.expected_times {
                if expectation.times_called >= expected {
                    continue;
                }
            }

            expectation.times_called += 1;
            return Ok(expectation.response.clone());
        }

        Err(ProcessError::MockExpectationNotMet(format!(
            "No expectation found for command: {} {:?}",
            command.program, command.args
        )))
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn spawn(&self, command: &ProcessCommand) -> Result<SpawnedProcess, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let response = self.next_response(command)?;
        if response.not_found {
            return Err(ProcessError::CommandNotFound(command.program.clone()));
        }

        Ok(SpawnedProcess {
            child: Box::new(MockChild {
                status: response.status,
                delay: response.delay,
                hangs: response.hangs,
                killed: false,
                kill_signal: Arc::new(Notify::new()),
            }),
            stdin: Some(Box::new(tokio::io::sink())),
            stdout: Box::new(Cursor::new(response.stdout.into_bytes())),
            stderr: Box::new(Cursor::new(response.stderr.into_bytes())),
        })
    }
}

/// A scripted process: exits after its delay, or only once killed when it hangs
struct MockChild {
    status: ExitStatus,
    delay: Duration,
    hangs: bool,
    killed: bool,
    kill_signal: Arc<Notify>,
}

#[async_trait]
impl ChildProcess for MockChild {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if self.killed {
            return Ok(ExitStatus::Signal(9));
        }
        if self.hangs {
            self.kill_signal.notified().await;
            return Ok(ExitStatus::Signal(9));
        }
        tokio::time::sleep(self.delay).await;
        Ok(self.status)
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        self.killed = true;
        self.kill_signal.notify_one();
        Ok(())
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.response.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.response.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_success(mut self) -> Self {
        self.expectation.response.status = ExitStatus::Success;
        self
    }

    /// Simulate a missing executable
    pub fn not_found(mut self) -> Self {
        self.expectation.response.not_found = true;
        self
    }

    /// The process never exits on its own
    pub fn hangs(mut self) -> Self {
        self.expectation.response.hangs = true;
        self
    }

    /// The process exits only after the given delay
    pub fn exits_after(mut self, delay: Duration) -> Self {
        self.expectation.response.delay = delay;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
