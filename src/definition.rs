//! YAML workflow definitions
//!
//! A definition describes a [`Workflow`] made of command steps:
//!
//! ```yaml
//! label: Installation
//! title: Install the platform
//! intro_text:
//!   - This process may take a few minutes.
//! requirements:
//!   - name: Docker
//!     probe: "{driver} -v"
//! steps:
//!   - label: Pulling images
//!     run: ["docker", "compose", "-f", "{compose_file}", "pull"]
//!     capture: echo
//!     timeout_secs: 600
//!     retries: 3
//!     on_failure: "docker compose -f {compose_file} down"
//! ```
//!
//! Commands are either an argument list or a single shell-words string.
//! `{key}` placeholders are filled from `--set key=value` variables when the
//! workflow is built, so a missing variable is reported before anything runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ErrorCode, FailureKind, InstallerError, Result};
use crate::subprocess::{CaptureMode, ProcessCommand, ProcessCommandBuilder};
use crate::workflow::{Action, Requirement, Step, StepOutcome, Workflow};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Valid regex pattern")
});

/// Variables available to `{key}` placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Parse `key=value` assignments as given on the command line
    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vars = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            match assignment.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => vars.set(key.trim(), value),
                _ => {
                    return Err(InstallerError::abort_with_code(
                        ErrorCode::CONFIG_INVALID_VALUE,
                        format!("Invalid variable assignment '{}', expected key=value", assignment),
                    ))
                }
            }
        }
        Ok(vars)
    }

    /// Replace every `{key}` in `template`
    pub fn render(&self, template: &str) -> Result<String> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match self.get(key) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(key) => Err(InstallerError::abort_with_code(
                ErrorCode::CONFIG_MISSING_VARIABLE,
                format!("Variable '{}' is not set, pass it with --set {}=<value>", key, key),
            )),
            None => Ok(rendered.into_owned()),
        }
    }
}

/// A command as written in a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Argv(Vec<String>),
    Line(String),
}

impl CommandSpec {
    /// Split into arguments and render each one
    ///
    /// A line is split before rendering, so variable values containing
    /// spaces stay a single argument.
    pub fn render(&self, vars: &Variables) -> Result<Vec<String>> {
        let raw = match self {
            CommandSpec::Argv(argv) => argv.clone(),
            CommandSpec::Line(line) => shell_words::split(line).map_err(|e| {
                InstallerError::abort_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("Could not parse command '{}'", line),
                )
                .with_source(e)
            })?,
        };
        raw.iter().map(|arg| vars.render(arg)).collect()
    }

    fn to_command(&self, vars: &Variables) -> Result<ProcessCommandBuilder> {
        let argv = self.render(vars)?;
        ProcessCommandBuilder::from_argv(&argv).ok_or_else(|| {
            InstallerError::abort_with_code(ErrorCode::CONFIG_INVALID_VALUE, "Empty command")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementDefinition {
    pub name: String,
    pub probe: CommandSpec,
}

/// Guard that aborts the workflow during validation when its probe succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDefinition {
    pub probe: CommandSpec,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub label: String,
    pub run: CommandSpec,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub capture: CaptureMode,

    /// Fail the step on non-zero exit codes
    #[serde(default = "default_true")]
    pub raise_on_non_zero: bool,

    /// Per-attempt time limit; enables retries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Payload written to the command's input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// The step is skipped when this probe succeeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<CommandSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDefinition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<CommandSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<CommandSpec>,
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub label: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub intro_text: Vec<String>,

    #[serde(default)]
    pub requirements: Vec<RequirementDefinition>,

    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::CONFIG_NOT_FOUND
            } else {
                ErrorCode::CONFIG_GENERIC
            };
            InstallerError::abort_with_code(
                code,
                format!("Could not read workflow definition {}", path.display()),
            )
            .with_source(e)
        })?;
        Self::from_yaml_str(&content)
            .map_err(|e| e.with_context(format!("in {}", path.display())))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(content).map_err(|e| {
            InstallerError::abort_with_code(
                ErrorCode::CONFIG_INVALID_YAML,
                "Invalid workflow definition",
            )
            .with_source(e)
        })?;
        definition.check()?;
        Ok(definition)
    }

    fn check(&self) -> Result<()> {
        let invalid = |message: String| {
            Err(InstallerError::abort_with_code(ErrorCode::CONFIG_INVALID_VALUE, message))
        };
        if self.label.trim().is_empty() {
            return invalid("Workflow label must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return invalid(format!("Workflow '{}' has no steps", self.label));
        }
        for step in &self.steps {
            if step.label.trim().is_empty() {
                return invalid(format!("Workflow '{}' has a step without label", self.label));
            }
            if step.retries == 0 {
                return invalid(format!("Step '{}' needs at least one attempt", step.label));
            }
        }
        Ok(())
    }

    /// Build the runnable workflow, rendering every command with `vars`
    pub fn build(&self, vars: &Variables) -> Result<Workflow<()>> {
        let title = vars.render(self.title.as_deref().unwrap_or(&self.label))?;
        let intro_text = self
            .intro_text
            .iter()
            .map(|line| vars.render(line))
            .collect::<Result<Vec<_>>>()?;
        let mut workflow = Workflow::new(&self.label)
            .title(title)
            .intro_text(intro_text);

        for requirement in &self.requirements {
            let probe = requirement.probe.to_command(vars)?.build();
            workflow = workflow.requirement(Requirement::new(&requirement.name, probe));
        }

        for step in &self.steps {
            let step = CommandStep::from_definition(step, vars)
                .map_err(|e| e.with_context(format!("in step '{}'", step.label)))?;
            workflow = workflow.step(step);
        }

        Ok(workflow)
    }
}

/// Workflow step running external commands
#[derive(Debug, Clone)]
pub struct CommandStep {
    label: String,
    required: bool,
    command: ProcessCommand,
    timeout: Option<Duration>,
    retries: u32,
    skip_if: Option<ProcessCommand>,
    conflict: Option<(ProcessCommand, String)>,
    on_success: Option<ProcessCommand>,
    on_failure: Option<ProcessCommand>,
}

impl CommandStep {
    pub fn new(label: impl Into<String>, command: ProcessCommand) -> Self {
        Self {
            label: label.into(),
            required: true,
            command,
            timeout: None,
            retries: 1,
            skip_if: None,
            conflict: None,
            on_success: None,
            on_failure: None,
        }
    }

    fn from_definition(definition: &StepDefinition, vars: &Variables) -> Result<Self> {
        let mut builder = definition
            .run
            .to_command(vars)?
            .capture(definition.capture)
            .raise_on_non_zero(definition.raise_on_non_zero);
        for (key, value) in &definition.env {
            builder = builder.env(key, &vars.render(value)?);
        }
        if let Some(input) = &definition.input {
            builder = builder.stdin(vars.render(input)?);
        }

        let hook = |spec: &Option<CommandSpec>| -> Result<Option<ProcessCommand>> {
            spec.as_ref()
                .map(|spec| spec.to_command(vars).map(|b| b.build()))
                .transpose()
        };

        let conflict = match &definition.conflict {
            Some(conflict) => Some((
                conflict.probe.to_command(vars)?.build(),
                vars.render(&conflict.message)?,
            )),
            None => None,
        };

        Ok(Self {
            label: definition.label.clone(),
            required: definition.required,
            command: builder.build(),
            timeout: definition.timeout_secs.map(Duration::from_secs),
            retries: definition.retries,
            skip_if: hook(&definition.skip_if)?,
            conflict,
            on_success: hook(&definition.on_success)?,
            on_failure: hook(&definition.on_failure)?,
        })
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_retries(mut self, timeout: Duration, retries: u32) -> Self {
        self.timeout = Some(timeout);
        self.retries = retries;
        self
    }

    pub fn skip_if(mut self, probe: ProcessCommand) -> Self {
        self.skip_if = Some(probe);
        self
    }

    pub fn conflict(mut self, probe: ProcessCommand, message: impl Into<String>) -> Self {
        self.conflict = Some((probe, message.into()));
        self
    }

    pub fn on_success(mut self, command: ProcessCommand) -> Self {
        self.on_success = Some(command);
        self
    }

    pub fn on_failure(mut self, command: ProcessCommand) -> Self {
        self.on_failure = Some(command);
        self
    }

    pub fn command(&self) -> &ProcessCommand {
        &self.command
    }
}

/// Run a probe quietly; only an interruption is an error
async fn probe_succeeds(action: &Action, probe: &ProcessCommand) -> Result<bool> {
    let mut probe = probe.clone();
    probe.capture = CaptureMode::None;
    probe.raise_on_non_zero = true;
    match action.run_cmd(probe).await {
        Ok(_) => Ok(true),
        Err(failure) if failure.kind == FailureKind::Interrupted => Err(failure.into()),
        Err(failure) => {
            debug!("Probe did not succeed: {}", failure);
            Ok(false)
        }
    }
}

#[async_trait]
impl Step<()> for CommandStep {
    fn label(&self) -> &str {
        &self.label
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn validate(&mut self, action: &Action, _args: &()) -> Result<()> {
        let Some((probe, message)) = &self.conflict else {
            return Ok(());
        };
        if probe_succeeds(action, probe).await? {
            action.console().msg(message);
            return Err(InstallerError::abort_with_code(
                ErrorCode::WORKFLOW_CONFLICTING_INSTALL,
                message.clone(),
            ));
        }
        Ok(())
    }

    async fn run(&mut self, action: &Action, _args: &()) -> Result<StepOutcome> {
        if let Some(probe) = &self.skip_if {
            if probe_succeeds(action, probe).await? {
                debug!("Step [{}] has nothing to do", self.label);
                return Ok(StepOutcome::Skipped);
            }
        }

        match self.timeout {
            Some(timeout) => {
                action
                    .run_cmd_retries(self.command.clone(), timeout, self.retries)
                    .await?
            }
            None => {
                action.run_cmd(self.command.clone()).await?;
            }
        }
        Ok(StepOutcome::Completed)
    }

    async fn on_success(&mut self, action: &Action, _args: &()) -> Result<()> {
        run_hook(action, &self.label, self.on_success.as_ref()).await
    }

    async fn on_failure(&mut self, action: &Action, _args: &()) -> Result<()> {
        run_hook(action, &self.label, self.on_failure.as_ref()).await
    }
}

/// Run a hook command unless processing was interrupted
async fn run_hook(action: &Action, label: &str, command: Option<&ProcessCommand>) -> Result<()> {
    let Some(command) = command else {
        return Ok(());
    };
    if action.is_interrupted() {
        info!("Skipping hook of step [{}], processing was interrupted", label);
        return Ok(());
    }
    action.run_cmd(command.clone()).await?;
    Ok(())
}
