//! Top-level driver for one installer run
//!
//! Ties a [`Workflow`] to a fresh [`Session`], routes the engine log into
//! the session folder, turns Ctrl-C into cancellation and maps the outcome to
//! what the operator sees and to the process exit status.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::InstallerConfig;
use crate::console::Console;
use crate::error::{ErrorCode, InstallerError, EXIT_SUCCESS};
use crate::session::{Session, SessionGuard, SessionLogging};
use crate::subprocess::{FailureKind, ProcessRunner, TokioProcessRunner};
use crate::workflow::{Action, Workflow, WorkflowReport};

const SUPPORT_HINT: &str = "For assistance, reach out the #support channel on \
    https://data-observability-slack.datakitchen.io/join, attaching the logs.";

const INTERRUPTED_MESSAGE: &str =
    "Processing interrupted. This may result in an inconsistent platform state.";

/// How an installer run ended
#[derive(Debug)]
pub struct InstallOutcome {
    pub exit_code: i32,
    pub report: Option<WorkflowReport>,
    pub error: Option<InstallerError>,
    /// Archive holding the session logs, when archiving succeeded
    pub archive: Option<PathBuf>,
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

/// Runs workflows inside sessions
pub struct Installer {
    config: InstallerConfig,
    runner: Arc<dyn ProcessRunner>,
    console: Console,
}

impl Installer {
    pub fn new(config: InstallerConfig) -> Self {
        Self {
            config,
            runner: Arc::new(TokioProcessRunner),
            console: Console::stdout(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Run `workflow` in a new session named after `prefix`
    pub async fn run<A: Sync>(
        &self,
        prefix: &str,
        workflow: &mut Workflow<A>,
        args: &A,
    ) -> InstallOutcome {
        let session = match Session::begin(&self.config.logs_root, prefix) {
            Ok(session) => session,
            Err(e) => return self.early_failure(e),
        };

        let logging = match SessionLogging::configure(&session, self.config.debug) {
            Ok(logging) => logging,
            Err(e) => {
                let outcome = self.early_failure(e);
                return self.close(session, outcome);
            }
        };

        log_system_info();

        let cancel = CancellationToken::new();
        let interrupt_task = self
            .config
            .interrupt_on_ctrl_c
            .then(|| spawn_interrupt_listener(cancel.clone()));

        let action = Action::new(
            workflow.label(),
            Arc::clone(&self.runner),
            session.handle(),
            self.console.clone(),
        )
        .with_cancellation(cancel.clone())
        .with_poll_interval(self.config.drain_poll_interval);

        let result = workflow.execute(&action, args).await;

        if let Some(task) = interrupt_task {
            task.abort();
        }

        let outcome = match result {
            Ok(report) => {
                info!(
                    "Workflow [{}] completed with {} step(s)",
                    report.label,
                    report.steps.len()
                );
                InstallOutcome {
                    exit_code: EXIT_SUCCESS,
                    report: Some(report),
                    error: None,
                    archive: None,
                }
            }
            Err(e) => {
                let error = self.classify(e, &cancel);
                self.report_failure(&session, &error);
                InstallOutcome {
                    exit_code: error.exit_code(),
                    report: None,
                    error: Some(error),
                    archive: None,
                }
            }
        };

        drop(logging);
        self.close(session, outcome)
    }

    /// Sort a workflow error into the abort or defect category
    fn classify(&self, error: InstallerError, cancel: &CancellationToken) -> InstallerError {
        let interrupted = cancel.is_cancelled()
            || error
                .command_failure()
                .is_some_and(|failure| failure.kind == FailureKind::Interrupted);

        if interrupted {
            self.console.space();
            self.console.msg(INTERRUPTED_MESSAGE);
            return InstallerError::abort_with_code(ErrorCode::WORKFLOW_CANCELLED, "Processing interrupted")
                .with_source(error);
        }

        match error {
            e @ (InstallerError::Abort { .. } | InstallerError::Defect { .. }) => e,
            other => {
                error!("Uncaught error: {:?}", other);
                InstallerError::defect_with_code(ErrorCode::OTHER_UNEXPECTED, "Uncaught error")
                    .with_source(other)
            }
        }
    }

    fn report_failure(&self, session: &Session, error: &InstallerError) {
        if let Some(artifact) = session.locate_failure_artifact(error) {
            match artifact.read() {
                Ok(output) => {
                    self.console.space();
                    self.console.msg(&format!(
                        "Command [{:04}] [{}] {}:",
                        artifact.index, artifact.command, artifact.stream
                    ));
                    for line in output.lines() {
                        self.console.msg(line);
                    }
                }
                Err(e) => warn!("Could not read {}: {}", artifact.path.display(), e),
            }
        }

        if error.is_abort() {
            info!("Workflow aborted: {}", error.developer_message());
            return;
        }

        error!("Workflow failed: {}", error.developer_message());
        self.console.space();
        self.console.msg(&format!(
            "An unexpected error occurred. Please check the logs in {} for details.",
            display_path(&session.archive_path()).display()
        ));
        self.console.space();
        self.console.msg(SUPPORT_HINT);
    }

    fn early_failure(&self, error: InstallerError) -> InstallOutcome {
        error!("Could not prepare the installer session: {}", error.developer_message());
        self.console.msg(&format!("The installer could not start: {}", error.user_message()));
        let error = if error.is_abort() || error.is_defect() {
            error
        } else {
            InstallerError::defect_with_code(ErrorCode::SESSION_GENERIC, "Session setup failed")
                .with_source(error)
        };
        InstallOutcome {
            exit_code: error.exit_code(),
            report: None,
            error: Some(error),
            archive: None,
        }
    }

    fn close(&self, session: SessionGuard, mut outcome: InstallOutcome) -> InstallOutcome {
        match session.close() {
            Ok(archive) => outcome.archive = Some(archive),
            Err(e) => {
                error!("Session logs could not be archived: {}", e.developer_message());
                self.console.msg(&format!("The installer logs could not be archived: {}", e));
            }
        }
        outcome
    }
}

fn spawn_interrupt_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("Interrupt received, cancelling the running workflow");
                    cancel.cancel();
                }
                Err(e) => warn!("Could not listen for interrupts: {}", e),
            },
            _ = cancel.cancelled() => {}
        }
    })
}

fn log_system_info() {
    let os_type = sys_info::os_type().unwrap_or_else(|_| "unknown".to_string());
    let os_release = sys_info::os_release().unwrap_or_else(|_| "unknown".to_string());
    info!("System info: {} | {}", os_type, os_release);
    info!("Platform info: {} | {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Installer version: {}", env!("CARGO_PKG_VERSION"));
}

/// Path relative to the working directory when it lives below it
fn display_path(path: &Path) -> PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
}
