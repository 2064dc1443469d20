use crate::env::Environment;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl. Commands write their
/// regular output to `stdout`, which the dispatcher points at the process's
/// standard output once any redirections have been installed.
pub trait ExecutableCommand {
    /// Whether the dispatcher should validate and install redirections
    /// around this command. Commands that never produce stream output opt
    /// out and ignore redirection tokens entirely.
    fn wants_redirections(&self) -> bool {
        true
    }

    /// Executes the command.
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`; the
/// dispatcher then falls through to external lookup.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
