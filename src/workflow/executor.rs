use tracing::{debug, error, info, warn};

use super::requirement::Requirement;
use super::step::{Step, StepOutcome, StepReport, StepState};
use super::Action;
use crate::error::{ErrorCode, InstallerError};

/// Phases a workflow run goes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Pending,
    CheckingRequirements,
    Validating,
    Running,
    Compensating,
    Done,
}

/// Summary of a successful workflow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    pub label: String,
    pub steps: Vec<StepReport>,
}

impl WorkflowReport {
    pub fn count(&self, state: StepState) -> usize {
        self.steps.iter().filter(|step| step.state == state).count()
    }
}

/// An ordered list of steps run with reverse-order compensation
///
/// A run checks every requirement, validates every step, runs the steps in
/// order and finally calls `on_success` or `on_failure` on every step that
/// reached the running phase, last one first. After a required step fails
/// the remaining steps are not run but are still compensated.
pub struct Workflow<A: Sync> {
    label: String,
    title: String,
    intro_text: Vec<String>,
    requirements: Vec<Requirement>,
    steps: Vec<Box<dyn Step<A>>>,
    phase: WorkflowPhase,
}

impl<A: Sync> std::fmt::Debug for Workflow<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("label", &self.label)
            .field("title", &self.title)
            .field("intro_text", &self.intro_text)
            .field("requirements", &self.requirements)
            .field("steps", &self.steps.len())
            .field("phase", &self.phase)
            .finish()
    }
}

impl<A: Sync> Workflow<A> {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            title: label.clone(),
            label,
            intro_text: Vec::new(),
            requirements: Vec::new(),
            steps: Vec::new(),
            phase: WorkflowPhase::Pending,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn intro_text<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intro_text.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn step(mut self, step: impl Step<A> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn boxed_step(mut self, step: Box<dyn Step<A>>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn step_labels(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.label()).collect()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    fn enter(&mut self, phase: WorkflowPhase) {
        debug!("Workflow [{}] entering phase {:?}", self.label, phase);
        self.phase = phase;
    }

    pub async fn execute(
        &mut self,
        action: &Action,
        args: &A,
    ) -> Result<WorkflowReport, InstallerError> {
        self.enter(WorkflowPhase::CheckingRequirements);
        if let Err(e) = self.check_requirements(action).await {
            self.enter(WorkflowPhase::Done);
            return Err(e);
        }

        action.console().title(&self.title);

        self.enter(WorkflowPhase::Validating);
        let required = self.validate(action, args).await?;

        let console = action.console();
        console.space();
        for line in &self.intro_text {
            console.msg(line);
        }
        console.space();

        self.enter(WorkflowPhase::Running);
        let mut states = Vec::with_capacity(self.steps.len());
        let mut fatal: Option<(usize, InstallerError)> = None;

        for (index, step) in self.steps.iter_mut().enumerate() {
            let line = console.line();
            line.send(&format!("{}... ", step.label()));

            if fatal.is_some() {
                line.send("SKIPPED");
                states.push(StepState::SkippedAfterFailure);
                continue;
            }

            debug!("Executing step [{}]", step.label());
            match step.run(action, args).await {
                Ok(StepOutcome::Completed) => {
                    line.send("OK");
                    states.push(StepState::Completed);
                }
                Ok(StepOutcome::Skipped) => {
                    line.send("SKIPPED");
                    states.push(StepState::Skipped);
                }
                Err(e) => {
                    line.send("FAILED");
                    states.push(StepState::Failed);
                    if required[index] {
                        fatal = Some((index, e));
                    } else {
                        warn!("Non-required step [{}] failed with: {}", step.label(), e);
                    }
                }
            }
        }

        if fatal.is_some() {
            console.title(&format!("{} FAILED", self.label));
        } else {
            console.title(&format!("{} SUCCEEDED", self.label));
        }

        self.enter(WorkflowPhase::Compensating);
        let succeeded = fatal.is_none();
        for (step, state) in self.steps.iter_mut().zip(&states).rev() {
            let result = if succeeded && !state.is_failure() {
                debug!("Running [{}] on-success", step.label());
                step.on_success(action, args).await
            } else {
                debug!("Running [{}] on-failure", step.label());
                step.on_failure(action, args).await
            };
            if let Err(e) = result {
                error!("Post-execution of step [{}] failed: {:?}", step.label(), e);
            }
        }

        self.enter(WorkflowPhase::Done);

        if let Some((index, cause)) = fatal {
            let label = self.steps[index].label().to_string();
            info!("Workflow [{}] failed at step [{}]", self.label, label);
            let message = format!("Failed step: {}", label);
            let outcome = if cause.is_abort() {
                InstallerError::abort_with_code(cause.code(), message)
            } else {
                InstallerError::defect_with_code(ErrorCode::WORKFLOW_STEP_FAILED, message)
            };
            return Err(outcome.with_step(label).with_source(cause));
        }

        let steps = self
            .steps
            .iter()
            .zip(required)
            .zip(states)
            .map(|((step, required), state)| StepReport {
                label: step.label().to_string(),
                required,
                state,
            })
            .collect();

        Ok(WorkflowReport {
            label: self.label.clone(),
            steps,
        })
    }

    /// Evaluate every requirement, aborting with the full list of unmet ones
    async fn check_requirements(&self, action: &Action) -> Result<(), InstallerError> {
        let mut missing = Vec::new();
        for requirement in &self.requirements {
            if !requirement.is_satisfied(action).await {
                missing.push(requirement.name().to_string());
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        action.console().msg("Not all requirements are fulfilled");
        Err(InstallerError::abort_with_code(
            ErrorCode::WORKFLOW_REQUIREMENTS_UNMET,
            format!("Requirements not fulfilled: {}", missing.join(", ")),
        ))
    }

    /// Validate every step and snapshot their `required` flags
    async fn validate(&mut self, action: &Action, args: &A) -> Result<Vec<bool>, InstallerError> {
        let mut required = Vec::with_capacity(self.steps.len());
        let mut failure = None;
        for step in self.steps.iter_mut() {
            debug!("Running step [{}] validation", step.label());
            if let Err(e) = step.validate(action, args).await {
                failure = Some((step.label().to_string(), e));
                break;
            }
            required.push(step.required());
        }

        let Some((label, e)) = failure else {
            return Ok(required);
        };

        let message = format!("Failed step validation: {}", label);
        let outcome = if e.is_abort() {
            info!("Step [{}] validation failed", label);
            InstallerError::abort_with_code(e.code(), message)
        } else {
            error!("Step [{}] validation failed: {:?}", label, e);
            InstallerError::defect_with_code(ErrorCode::WORKFLOW_VALIDATION_FAILED, message)
        };
        self.enter(WorkflowPhase::Done);
        Err(outcome.with_step(label).with_source(e))
    }
}
