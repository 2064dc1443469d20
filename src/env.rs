use std::collections::HashMap;
use std::env as stdenv;
use thiserror::Error;

/// A single shell variable as stored by the interpreter.
///
/// Exported variables are additionally mirrored into the process environment,
/// which is what launched programs inherit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellVar {
    /// Current value of the variable.
    pub value: String,
    /// Whether the variable has been exported to the process environment.
    pub exported: bool,
}

/// Returned by [`Environment::export`] when the named variable was never set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("variable '{0}' not found")]
pub struct UnknownVariable(pub String);

/// Mutable, session-level variable store used by the interpreter.
///
/// The store starts empty at session start; it holds only variables created
/// by `name=value` assignments and `export`. Exported entries are mirrored
/// into the process environment immediately so that any child process spawned
/// later sees them. The `should_exit` flag lets the `exit` builtin tell the
/// read loop to terminate.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, ShellVar>,
    /// When set to true, indicates that the interactive loop should exit.
    pub should_exit: bool,
}

impl Environment {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a variable.
    ///
    /// If `exported` is true, or the entry was already exported, the new value
    /// is mirrored into the process environment right away.
    pub fn set(&mut self, name: &str, value: &str, exported: bool) {
        let entry = self
            .vars
            .entry(name.to_string())
            .or_insert_with(|| ShellVar {
                value: String::new(),
                exported: false,
            });
        entry.value = value.to_string();
        if exported {
            entry.exported = true;
        }
        if entry.exported {
            // The interpreter is a single-threaded loop; nothing else reads or
            // writes the process environment concurrently.
            unsafe { stdenv::set_var(name, value) };
        }
    }

    /// Look up a variable. Absent names yield `None`, never an error.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|var| var.value.as_str())
    }

    /// Mark an existing variable exported and mirror it into the process
    /// environment. Unknown names are reported to the caller.
    pub fn export(&mut self, name: &str) -> Result<(), UnknownVariable> {
        let var = self
            .vars
            .get_mut(name)
            .ok_or_else(|| UnknownVariable(name.to_string()))?;
        var.exported = true;
        unsafe { stdenv::set_var(name, &var.value) };
        Ok(())
    }

    /// Iterate over the exported variables, for snapshotting into a child
    /// process environment.
    pub fn exported(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .filter(|(_, var)| var.exported)
            .map(|(name, var)| (name.as_str(), var.value.as_str()))
    }
}
