use crate::env::Environment;
use crate::error::ShellError;
use crate::external;
use std::io::{Read, Write};
use std::process::{Child, Stdio};
use std::thread::JoinHandle;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Status returned by the `exit` built-in.
///
/// The value alone does not stop the shell: an external program may exit with
/// 127 too. The interpreter also raises [`Environment::should_exit`], and that
/// flag is what the REPL checks.
pub const EXIT_SENTINEL: ExitCode = 127;

/// One command plus its arguments after substitution; `stage[0]` is the name.
pub type Stage = Vec<String>;

/// Abstraction over a readable input stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// Implementors typically wrap standard input or a pipe. A blanket implementation
/// exists for any type that implements `Read` and `Into<Stdio>` (e.g. `PipeReader` or `File`).
pub trait Stdin: Read + Send {
    /// Convert this input into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;

    /// Whether this input carries data from an upstream stage.
    ///
    /// Built-ins such as `cat` only fall back to reading stdin when it is piped;
    /// the shell's own terminal input is never consumed that way.
    fn is_pipe(&self) -> bool {
        true
    }
}

impl<T: Read + Into<Stdio> + Send> Stdin for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Abstraction over a writable output stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// A blanket implementation exists for any type that implements `Write` and `Into<Stdio>`.
pub trait Stdout: Write + Send {
    /// Convert this output into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Write + Into<Stdio> + Send> Stdout for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Standard streams bound to a single stage of a pipeline.
pub struct StageIo {
    pub stdin: Box<dyn Stdin>,
    pub stdout: Box<dyn Stdout>,
    pub stderr: Box<dyn Stdout>,
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
pub trait ExecutableCommand: Send {
    /// Runs the command to completion.
    fn execute(self: Box<Self>, io: StageIo, env: &mut Environment) -> Result<ExitCode, ShellError>;

    /// Starts the command without waiting for it, so that the other stages of a
    /// pipeline can run at the same time.
    ///
    /// Every stream in `io` is owned by the started job from here on; the caller
    /// keeps nothing, so downstream readers see EOF once this stage is done.
    fn start(self: Box<Self>, io: StageIo, env: &Environment) -> Result<Job, ShellError>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
/// Implementations can use the environment to resolve executables (e.g., using PATH).
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>>;
}

/// What a finished stage hands back to the pipeline.
#[derive(Debug)]
pub struct StageOutcome {
    pub status: Result<ExitCode, ShellError>,
    /// Set when the stage was the `exit` built-in.
    pub exit_requested: bool,
}

/// A pipeline stage that has been started and not yet waited for.
pub enum Job {
    /// An external program.
    Process { name: String, child: Child },
    /// A built-in running on its own thread.
    Thread {
        name: String,
        handle: JoinHandle<StageOutcome>,
    },
}

impl Job {
    pub fn name(&self) -> &str {
        match self {
            Job::Process { name, .. } | Job::Thread { name, .. } => name,
        }
    }

    /// Blocks until the stage has finished.
    pub fn wait(self) -> StageOutcome {
        match self {
            Job::Process { name, mut child } => StageOutcome {
                status: child
                    .wait()
                    .map_err(|e| ShellError::spawn(&name, e))
                    .and_then(|status| external::exit_code_of(&name, status)),
                exit_requested: false,
            },
            Job::Thread { name, handle } => handle.join().unwrap_or_else(|_| StageOutcome {
                status: Err(ShellError::Terminated {
                    command: name,
                    reason: "built-in panicked".to_string(),
                }),
                exit_requested: false,
            }),
        }
    }
}
