//! Multi-step workflows
//!
//! A [`Workflow`] runs an ordered list of [`Step`]s against an [`Action`]
//! and compensates every step that reached the running phase in reverse
//! order once the outcome is known.

mod action;
mod executor;
mod requirement;
mod step;


pub use action::Action;
pub use executor::{Workflow, WorkflowPhase, WorkflowReport};
pub use requirement::Requirement;
pub use step::{Step, StepOutcome, StepReport, StepState};
