//! Redirection planning: validation without side effects, then installation
//! with rollback.

use crate::lexer::Token;
use nix::unistd::{AccessFlags, access, dup, dup2_stderr, dup2_stdin, dup2_stdout};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use thiserror::Error;

/// Which standard stream a redirection rebinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Input,
    Output,
    ErrorOutput,
}

impl RedirectKind {
    fn symbol(self) -> &'static str {
        match self {
            RedirectKind::Input => "<",
            RedirectKind::Output => ">",
            RedirectKind::ErrorOutput => "2>",
        }
    }
}

/// One redirection: an operator and its operand path, in line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSpec {
    pub kind: RedirectKind,
    pub path: String,
}

/// Failures raised while planning or installing redirections.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("syntax error near unexpected token `{0}'")]
    MissingOperand(&'static str),
    #[error("{0}: Permission denied")]
    TargetNotWritable(String),
    #[error("cannot access {0}: No such file or directory")]
    SourceNotReadable(String),
    #[error("{path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("failed to adjust standard streams: {0}")]
    Streams(#[from] nix::errno::Errno),
}

/// Opened files destined for the standard streams of the command about to
/// run. For an external command these are handed to the process launcher,
/// which installs them inside the new process before the image is replaced.
#[derive(Debug, Default)]
pub struct StdioOverrides {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

impl StdioOverrides {
    pub fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }
}

/// Duplicates of the three standard descriptors, taken before any
/// redirection is installed. Dropping the guard puts the originals back, so
/// a redirection can never leak past the line that requested it.
#[derive(Debug)]
pub struct StdioGuard {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
}

impl StdioGuard {
    fn save() -> Result<Self, RedirectError> {
        Ok(StdioGuard {
            stdin: dup(io::stdin())?,
            stdout: dup(io::stdout())?,
            stderr: dup(io::stderr())?,
        })
    }

    fn restore(&self) {
        let _ = dup2_stderr(&self.stderr);
        let _ = dup2_stdin(&self.stdin);
        let _ = dup2_stdout(&self.stdout);
    }
}

impl Drop for StdioGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// The ordered redirections requested by one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirections {
    specs: Vec<RedirectSpec>,
}

impl Redirections {
    /// Pair every redirection operator with the word that follows it.
    ///
    /// An operator followed by anything other than a word (or by nothing) is
    /// a syntax error naming that operator.
    pub fn from_tokens(tokens: &[Token]) -> Result<Self, RedirectError> {
        let mut specs = Vec::new();
        let mut pos = 0;

        while pos < tokens.len() {
            let kind = match tokens[pos] {
                Token::RedirectIn => Some(RedirectKind::Input),
                Token::RedirectOut => Some(RedirectKind::Output),
                Token::RedirectErr => Some(RedirectKind::ErrorOutput),
                Token::Word(_) | Token::Pipe => None,
            };
            match kind {
                Some(kind) => match tokens.get(pos + 1) {
                    Some(Token::Word(path)) => {
                        specs.push(RedirectSpec {
                            kind,
                            path: path.clone(),
                        });
                        pos += 2;
                    }
                    _ => return Err(RedirectError::MissingOperand(kind.symbol())),
                },
                None => pos += 1,
            }
        }

        Ok(Redirections { specs })
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[RedirectSpec] {
        &self.specs
    }

    /// Check every target without touching the live streams. Callable any
    /// number of times; no state accumulates between calls.
    ///
    /// Output targets must sit in a writable directory. Input targets must be
    /// readable, except that the check is skipped once a `>` redirection has
    /// already appeared earlier in the same sequence (long-standing behavior
    /// of this interpreter, kept intentionally).
    pub fn validate(&self) -> Result<(), RedirectError> {
        probe_standard_streams()?;

        let mut stdout_redirected = false;
        for spec in &self.specs {
            match spec.kind {
                RedirectKind::Output | RedirectKind::ErrorOutput => {
                    let dir = containing_dir(&spec.path);
                    if access(dir, AccessFlags::W_OK).is_err() {
                        return Err(RedirectError::TargetNotWritable(spec.path.clone()));
                    }
                    if spec.kind == RedirectKind::Output {
                        stdout_redirected = true;
                    }
                }
                RedirectKind::Input => {
                    if !stdout_redirected && access(spec.path.as_str(), AccessFlags::R_OK).is_err()
                    {
                        return Err(RedirectError::SourceNotReadable(spec.path.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Open every target, in the fixed installation order: error output
    /// first, then input, then output. When a stream is redirected more than
    /// once, every target is still opened (and truncated, for outputs) but
    /// the last one wins.
    pub fn open_stdio(&self) -> Result<StdioOverrides, RedirectError> {
        let mut overrides = StdioOverrides::default();
        for kind in [
            RedirectKind::ErrorOutput,
            RedirectKind::Input,
            RedirectKind::Output,
        ] {
            for spec in self.specs.iter().filter(|spec| spec.kind == kind) {
                let file = spec.open()?;
                match kind {
                    RedirectKind::ErrorOutput => overrides.stderr = Some(file),
                    RedirectKind::Input => overrides.stdin = Some(file),
                    RedirectKind::Output => overrides.stdout = Some(file),
                }
            }
        }
        Ok(overrides)
    }

    /// Install the redirections over the current process's standard streams.
    ///
    /// The previous descriptors are saved first and restored by the returned
    /// guard when it is dropped; if any step fails the originals are restored
    /// before the error is returned, so no partial redirection survives.
    pub fn apply(&self) -> Result<StdioGuard, RedirectError> {
        let guard = StdioGuard::save()?;
        let overrides = self.open_stdio()?;
        if let Some(file) = &overrides.stderr {
            dup2_stderr(file)?;
        }
        if let Some(file) = &overrides.stdin {
            dup2_stdin(file)?;
        }
        if let Some(file) = &overrides.stdout {
            dup2_stdout(file)?;
        }
        Ok(guard)
    }
}

impl RedirectSpec {
    fn open(&self) -> Result<File, RedirectError> {
        let opened = match self.kind {
            RedirectKind::Input => File::open(&self.path),
            RedirectKind::Output | RedirectKind::ErrorOutput => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o666)
                .open(&self.path),
        };
        opened.map_err(|err| match (self.kind, err.kind()) {
            (RedirectKind::Input, io::ErrorKind::NotFound) => {
                RedirectError::SourceNotReadable(self.path.clone())
            }
            _ => RedirectError::Open {
                path: self.path.clone(),
                source: err,
            },
        })
    }
}

/// The directory that must be writable for a target path: everything before
/// the last `/`, or the current directory when there is none (or when the
/// slash is leading).
fn containing_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ".",
        Some(idx) => &path[..idx],
    }
}

/// Duplicate and immediately drop each standard stream. This confirms the
/// descriptors are present and duplicable without ever rebinding them.
fn probe_standard_streams() -> Result<(), RedirectError> {
    drop(dup(io::stdin())?);
    drop(dup(io::stdout())?);
    drop(dup(io::stderr())?);
    Ok(())
}
