use std::collections::BTreeMap;
use std::path::Path;

use super::runner::{CaptureMode, ProcessCommand};

pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            command: ProcessCommand {
                program: program.to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
                working_dir: None,
                stdin: None,
                capture: CaptureMode::None,
                raise_on_non_zero: true,
            },
        }
    }

    /// Start from a full argument vector, the first element being the program
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self::new(program.as_ref()).args(argv))
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.command.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command
            .args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            self.command
                .env
                .insert(key.as_ref().to_string(), value.as_ref().to_string());
        }
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.command.stdin = Some(input.into());
        self
    }

    pub fn capture(mut self, mode: CaptureMode) -> Self {
        self.command.capture = mode;
        self
    }

    /// Keep going when the process exits with a non-zero code
    pub fn allow_non_zero(mut self) -> Self {
        self.command.raise_on_non_zero = false;
        self
    }

    pub fn raise_on_non_zero(mut self, raise: bool) -> Self {
        self.command.raise_on_non_zero = raise;
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}
