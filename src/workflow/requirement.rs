use tracing::debug;

use super::Action;
use crate::subprocess::{CaptureMode, ProcessCommand};

/// Something the host must provide, verified by running a probe command
#[derive(Debug, Clone)]
pub struct Requirement {
    name: String,
    probe: ProcessCommand,
}

impl Requirement {
    pub fn new(name: impl Into<String>, probe: ProcessCommand) -> Self {
        Self {
            name: name.into(),
            probe,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probe(&self) -> &ProcessCommand {
        &self.probe
    }

    /// Run the probe; a zero exit code means the requirement is met
    ///
    /// Never fails: any problem running the probe counts as unmet and is
    /// reported to the operator.
    pub async fn is_satisfied(&self, action: &Action) -> bool {
        let mut probe = self.probe.clone();
        probe.capture = CaptureMode::None;
        probe.raise_on_non_zero = true;

        match action.run_cmd(probe).await {
            Ok(_) => true,
            Err(failure) => {
                debug!("Requirement [{}] probe failed: {}", self.name, failure);
                action.console().msg(&format!(
                    "The installer could not verify that '{}' is available.",
                    self.name
                ));
                false
            }
        }
    }
}
