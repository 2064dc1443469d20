use crate::builtin::{Cd, Echo, Exit, Export, Pwd};
use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::expand::expand;
use crate::external::{OsLauncher, ProcessLauncher, find_command_path};
use crate::lexer::{self, Token};
use crate::parser::extract_argv;
use crate::redirect::Redirections;
use regex::Regex;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;

const PROMPT: &str = "nanoshell> ";

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the builtin commands defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// A minimal interactive command interpreter.
///
/// Each input line is either a `name=value` assignment or a command:
/// variables are expanded, the line is tokenized, redirections are validated
/// and installed around the command, and the command runs as a builtin or as
/// an externally launched program. The interpreter tracks the status of the
/// last command and whether any command of the session failed.
///
/// Example
/// ```
/// use nanoshell::Interpreter;
/// let mut sh = Interpreter::default();
/// sh.run_line("GREETING=hello");
/// sh.run_line("echo $GREETING world");
/// assert_eq!(sh.exit_status(), 0);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: Vec<Box<dyn CommandFactory>>,
    launcher: Box<dyn ProcessLauncher>,
    assignment: Regex,
    last_status: ExitCode,
    has_error: bool,
}

impl Interpreter {
    /// Create an interpreter with a custom set of builtin factories and a
    /// custom process launcher.
    pub fn new(builtins: Vec<Box<dyn CommandFactory>>, launcher: Box<dyn ProcessLauncher>) -> Self {
        Self {
            env: Environment::new(),
            builtins,
            launcher,
            // name=value with no space anywhere and a non-empty name.
            assignment: Regex::new(r"^([^= ]+)=([^ ]*)$").expect("assignment pattern"),
            last_status: 0,
            has_error: false,
        }
    }

    /// Process one line of input, updating the session state.
    pub fn run_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }

        if let Some(caps) = self.assignment.captures(line) {
            self.env.set(&caps[1], &caps[2], false);
            self.last_status = 0;
            return;
        }

        let expanded = expand(line, &self.env);
        let tokens = lexer::split_into_tokens(&expanded);
        let argv = extract_argv(&tokens);
        if argv.is_empty() {
            return;
        }

        let status = self.dispatch(&argv, &tokens);
        self.last_status = status;
        if status != 0 {
            self.has_error = true;
        }
    }

    /// The process exit status the session would report if it ended now:
    /// 1 if any command failed during the session, otherwise the status of
    /// the last command.
    pub fn exit_status(&self) -> ExitCode {
        if self.has_error { 1 } else { self.last_status }
    }

    /// Whether the `exit` builtin has been run.
    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Read and run lines until end of input or `exit`, then return the final
    /// session status.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        let mut rl = DefaultEditor::new()?;

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    self.run_line(&line);
                    if self.env.should_exit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(self.exit_status())
    }

    fn dispatch(&mut self, argv: &[String], tokens: &[Token]) -> ExitCode {
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        let mut created = None;
        for factory in &self.builtins {
            if let Some(cmd) = factory.try_create(&argv[0], &args) {
                created = Some(cmd);
                break;
            }
        }
        match created {
            Some(cmd) => self.run_builtin(cmd, tokens),
            None => self.run_external(argv, tokens),
        }
    }

    fn run_builtin(&mut self, cmd: Box<dyn ExecutableCommand>, tokens: &[Token]) -> ExitCode {
        let mut guard = None;
        if cmd.wants_redirections() {
            let redirections = match Redirections::from_tokens(tokens) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            if let Err(e) = redirections.validate() {
                eprintln!("{e}");
                return 1;
            }
            if !redirections.is_empty() {
                match redirections.apply() {
                    Ok(g) => guard = Some(g),
                    Err(e) => {
                        eprintln!("{e}");
                        return 1;
                    }
                }
            }
        }

        let status = match cmd.execute(&mut io::stdout(), &mut self.env) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{e:#}");
                1
            }
        };
        // Push buffered output through the (possibly redirected) descriptor
        // before the guard puts the original stream back.
        let _ = io::stdout().flush();
        drop(guard);
        status
    }

    fn run_external(&mut self, argv: &[String], tokens: &[Token]) -> ExitCode {
        let redirections = match Redirections::from_tokens(tokens) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("{e}");
                return 1;
            }
        };
        if let Err(e) = redirections.validate() {
            eprintln!("{e}");
            return 1;
        }

        // Targets are opened before the program is even looked up, the same
        // order a launched process would see: its redirections are installed
        // first, and only then does the exec attempt get to fail.
        let stdio = match redirections.open_stdio() {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{e}");
                return 1;
            }
        };

        let search_paths = std::env::var_os("PATH").unwrap_or_else(OsString::new);
        let Some(program) = find_command_path(&search_paths, Path::new(&argv[0])) else {
            eprintln!("{}: command not found", argv[0]);
            return 127;
        };
        let program = program.into_owned();

        let exported: Vec<(String, String)> = self
            .env
            .exported()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        match self.launcher.spawn(&program, &argv[1..], &exported, stdio) {
            Ok(status) => match status.code() {
                Some(code) => code,
                // Abnormal termination counts as a plain failure.
                None => 1,
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                eprintln!("{}: command not found", argv[0]);
                127
            }
            Err(err) => {
                eprintln!("{}: {}", argv[0], err);
                1
            }
        }
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the builtin set `pwd`, `echo`, `cd`,
    /// `export`, and `exit`, launching everything else as an external
    /// program.
    fn default() -> Self {
        Self::new(
            vec![
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Export>::default()),
                Box::new(Factory::<Exit>::default()),
            ],
            Box::new(OsLauncher),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::StdioOverrides;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::process::ExitStatus;
    use std::rc::Rc;

    #[derive(Debug, Clone)]
    struct SpawnRecord {
        program: PathBuf,
        args: Vec<String>,
        env: Vec<(String, String)>,
    }

    /// Launcher that records what would have been spawned and reports a
    /// fixed wait status.
    struct FakeLauncher {
        wait_status: i32,
        spawns: Rc<RefCell<Vec<SpawnRecord>>>,
    }

    impl ProcessLauncher for FakeLauncher {
        fn spawn(
            &self,
            program: &Path,
            args: &[String],
            env: &[(String, String)],
            _stdio: StdioOverrides,
        ) -> io::Result<ExitStatus> {
            use std::os::unix::process::ExitStatusExt;
            self.spawns.borrow_mut().push(SpawnRecord {
                program: program.to_path_buf(),
                args: args.to_vec(),
                env: env.to_vec(),
            });
            Ok(ExitStatus::from_raw(self.wait_status))
        }
    }

    fn interpreter_with_fake_launcher(
        wait_status: i32,
    ) -> (Interpreter, Rc<RefCell<Vec<SpawnRecord>>>) {
        let spawns = Rc::new(RefCell::new(Vec::new()));
        let launcher = FakeLauncher {
            wait_status,
            spawns: spawns.clone(),
        };
        let sh = Interpreter::new(
            vec![
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Export>::default()),
                Box::new(Factory::<Exit>::default()),
            ],
            Box::new(launcher),
        );
        (sh, spawns)
    }

    #[test]
    fn test_assignment_stores_unexported() {
        let mut sh = Interpreter::default();
        sh.run_line("GREETING=hi");
        assert_eq!(sh.env.get("GREETING"), Some("hi"));
        assert_eq!(sh.last_status, 0);
        assert!(std::env::var("GREETING").is_err());
    }

    #[test]
    fn test_assignment_requires_no_spaces() {
        let (mut sh, spawns) = interpreter_with_fake_launcher(0);
        // A space anywhere makes this a command line, not an assignment.
        sh.run_line("/bin/echo a=b extra");
        assert_eq!(sh.env.get("a"), None);
        assert_eq!(spawns.borrow().len(), 1);
        assert_eq!(spawns.borrow()[0].args, vec!["a=b", "extra"]);
    }

    #[test]
    fn test_assignment_value_survives_expansion() {
        let mut sh = Interpreter::default();
        sh.run_line("A=1");
        sh.run_line("B=$A");
        // Assignments are taken literally; expansion happens on use.
        assert_eq!(sh.env.get("B"), Some("$A"));
    }

    #[test]
    fn test_empty_and_blank_lines_do_nothing() {
        let mut sh = Interpreter::default();
        sh.run_line("");
        sh.run_line("   ");
        sh.run_line("> /tmp/never_created_by_nanoshell_tests");
        assert_eq!(sh.exit_status(), 0);
    }

    #[test]
    fn test_unknown_command_is_127() {
        let mut sh = Interpreter::default();
        sh.run_line("nonexistentcmd123");
        assert_eq!(sh.last_status, 127);
        assert!(sh.has_error);
        assert_eq!(sh.exit_status(), 1);
    }

    #[test]
    fn test_unknown_command_still_opens_redirection_targets() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let mut dir = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.push(format!("interp_test_{}_{}", std::process::id(), nanos));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let out = dir.join("out.txt");

        let mut sh = Interpreter::default();
        sh.run_line(&format!("nonexistentcmd123 > {}", out.display()));

        // The target is created and truncated before the lookup fails.
        assert_eq!(sh.last_status, 127);
        assert!(out.exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_external_argv_and_exported_env_forwarded() {
        let (mut sh, spawns) = interpreter_with_fake_launcher(0);
        sh.run_line("VISIBLE=yes");
        sh.run_line("export VISIBLE");
        sh.run_line("HIDDEN=no");
        sh.run_line("/bin/echo one two");

        let records = spawns.borrow();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.program, PathBuf::from("/bin/echo"));
        assert_eq!(record.args, vec!["one", "two"]);
        assert!(
            record
                .env
                .contains(&("VISIBLE".to_string(), "yes".to_string()))
        );
        assert!(!record.env.iter().any(|(name, _)| name == "HIDDEN"));
        assert_eq!(sh.last_status, 0);
    }

    #[test]
    fn test_external_failure_sets_error_flag() {
        use std::os::unix::process::ExitStatusExt;
        // Wait status encoding: exit code in the high byte.
        let status = ExitStatus::from_raw(5 << 8);
        assert_eq!(status.code(), Some(5));

        let (mut sh, _) = interpreter_with_fake_launcher(5 << 8);
        sh.run_line("/bin/echo hi");
        assert_eq!(sh.last_status, 5);
        assert!(sh.has_error);
    }

    #[test]
    fn test_exit_reports_sticky_session_error() {
        let mut sh = Interpreter::default();
        sh.run_line("nonexistentcmd123");
        sh.run_line("ANY=value");
        assert_eq!(sh.last_status, 0);

        sh.run_line("exit");
        assert!(sh.should_exit());
        // A session that ever failed exits non-zero.
        assert_eq!(sh.exit_status(), 1);
    }

    #[test]
    fn test_expansion_feeds_tokenizer() {
        let (mut sh, spawns) = interpreter_with_fake_launcher(0);
        sh.run_line("ARGS=one two");
        assert_eq!(sh.env.get("ARGS"), None); // space: not an assignment

        sh.run_line("WORD=payload");
        sh.run_line("/bin/echo $WORD");
        let records = spawns.borrow();
        assert_eq!(records.last().unwrap().args, vec!["payload"]);
    }

    #[test]
    fn test_builtin_syntax_error_sets_status() {
        let mut sh = Interpreter::default();
        sh.run_line("echo hi >");
        assert_eq!(sh.last_status, 1);
        assert!(sh.has_error);
    }

    #[test]
    fn test_export_ignores_redirection_tokens() {
        let mut sh = Interpreter::default();
        let name = format!("INTERP_EXPORT_QUIRK_{}", std::process::id());
        sh.run_line(&format!("{name}=v"));
        // The dangling operator would be a syntax error for echo; export
        // never looks at redirections, so the line succeeds.
        sh.run_line(&format!("export {name} >"));
        assert_eq!(sh.last_status, 0);
        assert!(!sh.has_error);
    }
}
