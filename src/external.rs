use crate::command::{
    CommandFactory, ExecutableCommand, ExitCode, Job, StageIo, StageOutcome,
};
use crate::env::Environment;
use crate::error::ShellError;
use crate::interpreter::Factory;
use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

/// Command that is not a builtin.
///
/// Runs with the real process environment and working directory; shell-local
/// variables are not exported.
pub struct ExternalCommand {
    name: String,
    path: PathBuf,
    args: Vec<OsString>,
}

impl ExternalCommand {
    pub fn new(name: impl Into<String>, path: PathBuf, args: Vec<OsString>) -> Self {
        Self {
            name: name.into(),
            path,
            args,
        }
    }
}

impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        let search_paths = env.get("PATH");
        let executable = find_command_path(OsStr::new(&search_paths), Path::new(name))?;
        log::debug!("{name} resolved to {}", executable.display());
        Some(Box::new(ExternalCommand::new(
            name,
            executable.into_owned(),
            args.iter().map(OsString::from).collect(),
        )))
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(self: Box<Self>, io: StageIo, env: &mut Environment) -> Result<ExitCode, ShellError> {
        let StageOutcome { status, .. } = self.start(io, env)?.wait();
        status
    }

    fn start(self: Box<Self>, io: StageIo, _env: &Environment) -> Result<Job, ShellError> {
        // The `Command` owns the stage's pipe ends and closes them when it is
        // dropped at the end of this function, right after the spawn.
        let child = std::process::Command::new(&self.path)
            .args(&self.args)
            .stdin(io.stdin.stdio())
            .stdout(io.stdout.stdio())
            .stderr(io.stderr.stdio())
            .spawn()
            .map_err(|e| ShellError::spawn(&self.name, e))?;
        log::debug!("started {} as pid {}", self.name, child.id());
        Ok(Job::Process {
            name: self.name,
            child,
        })
    }
}

/// Maps how a child process ended to the status the shell reports.
///
/// A normal exit yields the native code. A process whose reader went away
/// (`SIGPIPE`) quietly counts as 1, like a built-in hitting a broken pipe.
/// Anything else is an error, which the interpreter reports as status 1.
pub(crate) fn exit_code_of(name: &str, status: ExitStatus) -> Result<ExitCode, ShellError> {
    if let Some(code) = status.code() {
        return Ok(code);
    }
    if is_broken_pipe(status) {
        log::debug!("{name}: reader went away");
        return Ok(1);
    }
    Err(ShellError::Terminated {
        command: name.to_string(),
        reason: termination_reason(status),
    })
}

#[cfg(unix)]
fn is_broken_pipe(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    // SIGPIPE has the same number on Linux and the BSDs.
    const SIGPIPE: i32 = 13;
    status.signal() == Some(SIGPIPE)
}

#[cfg(not(unix))]
fn is_broken_pipe(_status: ExitStatus) -> bool {
    false
}

#[cfg(unix)]
fn termination_reason(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.signal(), status.core_dumped()) {
        (Some(signal), true) => format!("terminated by signal {signal} (core dumped)"),
        (Some(signal), false) => format!("terminated by signal {signal}"),
        (None, _) => "terminated abnormally".to_string(),
    }
}

#[cfg(not(unix))]
fn termination_reason(_status: ExitStatus) -> String {
    "terminated abnormally".to_string()
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo` on Unix or any `./`-prefixed path on other platforms: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}
