//! Scripted [`CommandRunner`] for tests

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;

use super::{CommandOutput, CommandRunner};

/// Answers commands from a table keyed by the full command line; unknown commands fail to start
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    /// Canned outputs
    script: HashMap<String, CommandOutput>,
    /// Every command line run, in order
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    /// Creates a runner that knows no commands
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a command that exits successfully with `stdout`
    pub(crate) fn ok(self, command: &str, stdout: &str) -> Self {
        self.with(
            command,
            CommandOutput {
                success: true,
                stdout: stdout.into(),
                stderr: String::new(),
            },
        )
    }

    /// Adds a command that exits with an error
    pub(crate) fn fail(self, command: &str, stdout: &str, stderr: &str) -> Self {
        self.with(
            command,
            CommandOutput {
                success: false,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        )
    }

    /// Adds a command with an arbitrary output
    pub(crate) fn with(mut self, command: &str, output: CommandOutput) -> Self {
        self.script.insert(command.to_owned(), output);
        self
    }

    /// Command lines run so far
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.borrow_mut().push(line.clone());
        self.script
            .get(&line)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, line))
    }
}
