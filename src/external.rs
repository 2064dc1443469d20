use crate::redirect::StdioOverrides;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Capability for launching an external program.
///
/// `env` is a snapshot of the exported shell variables, laid over the
/// inherited process environment. `stdio` carries the files any redirections
/// opened; the implementation must rebind the standard streams of the new
/// process before its image is replaced, never those of the interpreter.
pub trait ProcessLauncher {
    fn spawn(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
        stdio: StdioOverrides,
    ) -> io::Result<ExitStatus>;
}

/// Launcher backed by the OS process-creation facility. The interpreter
/// blocks until the launched program terminates.
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn spawn(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
        stdio: StdioOverrides,
    ) -> io::Result<ExitStatus> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.envs(env.iter().map(|(name, value)| (name, value)));
        // `Stdio::from` hands the descriptor to the child; the rebinding
        // happens on the child side of the spawn, before exec.
        if let Some(file) = stdio.stdin {
            cmd.stdin(Stdio::from(file));
        }
        if let Some(file) = stdio.stdout {
            cmd.stdout(Stdio::from(file));
        }
        if let Some(file) = stdio.stderr {
            cmd.stderr(Stdio::from(file));
        }
        cmd.status()
    }
}

/// Resolve a program name the way a typical shell would.
///
/// Absolute paths and `./`-prefixed or multi-component relative paths are
/// taken as-is when they exist; a bare name is searched through the
/// `search_paths` (PATH) directories and the first existing match wins. An
/// empty name never resolves. The result borrows `path` unless it came out
/// of the PATH search.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(name), None) => find_in_path(search_paths, name.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        let path = dir.join(cmd);
        if let Some(path) = find_by_path(&path) {
            return Some(path.to_owned());
        }
    }
    None
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let res = find_command_path(osstr("/bin"), path);
        assert!(res.is_some(), "Expected to find /bin/sh via absolute path");
        assert_eq!(res.unwrap().as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let path = Path::new("/bin/nonexisting");
        let res = find_command_path(osstr("/bin"), path);
        assert!(res.is_none());
    }

    #[test]
    fn single_component_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("sh"));
        let found = res.expect("Expected to find 'sh' in /bin via PATH search");
        assert!(found.as_ref().ends_with("sh"));
        assert!(found.as_ref().starts_with("/bin"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("nonexisting"));
        assert!(res.is_none());
    }

    #[test]
    fn empty_path_is_none() {
        let res = find_command_path(osstr("/bin"), Path::new(""));
        assert!(res.is_none());
    }

    #[test]
    fn launcher_reports_exit_code() {
        let status = OsLauncher
            .spawn(
                Path::new("/bin/sh"),
                &["-c".to_string(), "exit 7".to_string()],
                &[],
                StdioOverrides::default(),
            )
            .expect("spawn /bin/sh");
        assert_eq!(status.code(), Some(7));
    }

    #[test]
    fn launcher_snapshots_exported_variables() {
        let env = vec![("NANOSHELL_CHILD_VAR".to_string(), "42".to_string())];
        let status = OsLauncher
            .spawn(
                Path::new("/bin/sh"),
                &[
                    "-c".to_string(),
                    "test \"$NANOSHELL_CHILD_VAR\" = 42".to_string(),
                ],
                &env,
                StdioOverrides::default(),
            )
            .expect("spawn /bin/sh");
        assert!(status.success());
    }
}
