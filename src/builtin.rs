use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::io::Write;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Whether redirections are validated and installed around this builtin.
    /// Commands that only mutate session state ignore redirection tokens.
    fn wants_redirections() -> bool {
        true
    }

    /// Executes the command using the provided output stream and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

/// Wrapper giving a parsed builtin the object-safe command interface.
struct BuiltinAdapter<T>(T);

impl<T: BuiltinCommand> ExecutableCommand for BuiltinAdapter<T> {
    fn wants_redirections(&self) -> bool {
        T::wants_redirections()
    }

    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match T::execute(self.0, stdout, env) {
            Ok(code) => Ok(code),
            Err(e) => {
                // Diagnostics go to the error stream; the failure only ends
                // the current line, never the session.
                eprintln!("{e:#}");
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn wants_redirections(&self) -> bool {
        false
    }

    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            eprint!("{}", self.output);
            Ok(1)
        } else {
            stdout.write_all(self.output.as_bytes())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(BuiltinAdapter(cmd)),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        let cwd = env::current_dir().context("pwd")?;
        writeln!(stdout, "{}", cwd.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn wants_redirections() -> bool {
        false
    }

    fn execute(self, _stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        let target = self
            .target
            .ok_or_else(|| anyhow::anyhow!("cd: missing argument"))?;
        env::set_current_dir(&target).with_context(|| format!("cd: {target}"))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Mark a shell variable as exported to the environment of subsequently
/// launched programs.
pub struct Export {
    #[argh(positional)]
    /// name of an existing shell variable.
    pub name: Option<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn wants_redirections() -> bool {
        false
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let name = self
            .name
            .ok_or_else(|| anyhow::anyhow!("export: missing argument"))?;
        env.export(&name).context("export")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the shell, reporting the accumulated session status.
pub struct Exit {
    #[argh(positional, greedy)]
    /// accepted and ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn wants_redirections() -> bool {
        false
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        writeln!(stdout, "Good Bye")?;
        env.should_exit = true;
        Ok(0)
    }
}
