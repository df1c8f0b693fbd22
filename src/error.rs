//! Error kinds that can cross the boundary between a running command and the
//! interpreter.
//!
//! Nothing below the interpreter prints diagnostics on its own: commands hand a
//! [`ShellError`] back, and the interpreter turns it into a `<command>: <detail>`
//! line on standard error and an exit status.

use crate::command::ExitCode;
use thiserror::Error;

/// Closed set of failures the execution engine knows how to report.
#[derive(Debug, Error)]
pub enum ShellError {
    /// A built-in rejected its arguments or failed while running.
    #[error("{command}: {reason}")]
    Builtin { command: String, reason: String },

    /// The command could not be resolved or the process could not be started.
    #[error("{command}: {reason}")]
    Spawn { command: String, reason: String },

    /// An inter-stage pipe could not be created.
    #[error("pipe: {reason}")]
    Pipe { reason: String },

    /// The command stopped without producing an exit code (killed by a signal,
    /// or a built-in worker panicked).
    #[error("{command}: {reason}")]
    Terminated { command: String, reason: String },
}

impl ShellError {
    pub fn builtin(command: &str, err: anyhow::Error) -> Self {
        Self::Builtin {
            command: command.to_string(),
            reason: format!("{err:#}"),
        }
    }

    pub fn spawn(command: &str, reason: impl ToString) -> Self {
        Self::Spawn {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(command: &str) -> Self {
        Self::spawn(command, "command not found")
    }

    /// Status reported for this failure. Every kind currently maps to 1.
    pub fn exit_code(&self) -> ExitCode {
        1
    }
}
