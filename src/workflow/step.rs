use async_trait::async_trait;

use super::Action;
use crate::error::InstallerError;

/// How a step's `run` ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// The step had nothing to do
    Skipped,
}

/// Final state of a step after the running phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Completed,
    Skipped,
    /// Not run because an earlier required step failed
    SkippedAfterFailure,
    Failed,
}

impl StepState {
    /// Whether compensation should treat the step as not completed
    pub fn is_failure(&self) -> bool {
        matches!(self, StepState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub label: String,
    pub required: bool,
    pub state: StepState,
}

/// One unit of orchestrated work
///
/// `A` is the typed options object the workflow was invoked with. Every hook
/// gets the owning [`Action`] for running commands and talking to the
/// operator. `validate` may change what [`Step::required`] reports; it is
/// read once validation is over.
#[async_trait]
pub trait Step<A: Sync>: Send {
    fn label(&self) -> &str;

    fn required(&self) -> bool {
        true
    }

    /// Precondition check, called for every step before any step runs
    async fn validate(&mut self, _action: &Action, _args: &A) -> Result<(), InstallerError> {
        Ok(())
    }

    async fn run(&mut self, action: &Action, args: &A) -> Result<StepOutcome, InstallerError>;

    async fn on_success(&mut self, _action: &Action, _args: &A) -> Result<(), InstallerError> {
        Ok(())
    }

    async fn on_failure(&mut self, _action: &Action, _args: &A) -> Result<(), InstallerError> {
        Ok(())
    }
}
