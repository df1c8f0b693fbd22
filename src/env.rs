use std::collections::HashMap;
use std::env as stdenv;

/// Shell-local variables layered over the process environment.
///
/// The environment contains:
/// - `vars`: variables set by the shell itself. They shadow process variables of the
///   same name and are never exported to spawned programs.
/// - `should_exit`: a flag that a REPL loop can check to know when to terminate.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Local key-value store, initially empty.
    pub vars: HashMap<String, String>,
    /// When set to true, indicates that an interactive loop should exit.
    pub should_exit: bool,
}

impl Environment {
    /// Create an environment with no local variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a variable, or `None` when it is set neither locally
    /// nor in the process environment.
    ///
    /// Looks up the key in `self.vars` first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Like [`Environment::get_var`], but unset names read as the empty string.
    pub fn get(&self, key: &str) -> String {
        self.get_var(key).unwrap_or_default()
    }

    /// Set or override a variable in `self.vars`. The process environment is left alone.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }
}
