use crate::command::{
    CommandFactory, EXIT_SENTINEL, ExecutableCommand, ExitCode, Job, StageIo, StageOutcome,
};
use crate::env::Environment;
use crate::error::ShellError;
use crate::interpreter::Factory;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use regex::bytes::{Regex, RegexBuilder};
use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs + Send + 'static {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// `stdin` is `None` unless the builtin reads from a pipe. Errors are reported
    /// by the interpreter as `<name>: <error>` with status 1.
    fn execute(
        self,
        stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;

    /// Executes the command as one stage of a multi-stage pipeline.
    ///
    /// The stage runs on a worker thread with a copy of the environment, so
    /// commands whose effect is on the session itself override this to leave
    /// the session alone.
    fn execute_in_pipeline(
        self,
        stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        BuiltinCommand::execute(self, stdin, stdout, env)
    }
}

type BuiltinBody<T> =
    fn(T, Option<&mut dyn Read>, &mut dyn Write, &mut Environment) -> Result<ExitCode>;

/// Wires the stage streams into `body` and maps its outcome to a status.
fn run_builtin<T: BuiltinCommand>(
    cmd: T,
    body: BuiltinBody<T>,
    io: StageIo,
    env: &mut Environment,
) -> Result<ExitCode, ShellError> {
    let StageIo {
        mut stdin,
        mut stdout,
        ..
    } = io;
    let input = if stdin.is_pipe() {
        Some(&mut stdin as &mut dyn Read)
    } else {
        None
    };
    let result = body(cmd, input, &mut stdout, env).and_then(|code| {
        stdout.flush()?;
        Ok(code)
    });
    match result {
        Ok(code) => Ok(code),
        Err(e) if is_broken_pipe(&e) => {
            log::debug!("{}: reader went away: {e:#}", T::name());
            Ok(1)
        }
        Err(e) => Err(ShellError::builtin(T::name(), e)),
    }
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, io: StageIo, env: &mut Environment) -> Result<ExitCode, ShellError> {
        run_builtin(*self, <T as BuiltinCommand>::execute, io, env)
    }

    fn start(self: Box<Self>, io: StageIo, env: &Environment) -> Result<Job, ShellError> {
        start_on_thread(T::name(), io, env, move |io, env| {
            run_builtin(*self, T::execute_in_pipeline, io, env)
        })
    }
}

/// Runs an in-process command on its own thread so it can feed (or drain) a
/// pipe while the other stages run.
///
/// The thread works on a copy of the environment; only the `exit` request
/// travels back.
fn start_on_thread<F>(name: &str, io: StageIo, env: &Environment, run: F) -> Result<Job, ShellError>
where
    F: FnOnce(StageIo, &mut Environment) -> Result<ExitCode, ShellError> + Send + 'static,
{
    let mut env = env.clone();
    let handle = thread::Builder::new()
        .name(format!("builtin-{name}"))
        .spawn(move || {
            let status = run(io, &mut env);
            StageOutcome {
                status,
                exit_requested: env.should_exit,
            }
        })
        .map_err(|e| ShellError::spawn(name, e))?;
    Ok(Job::Thread {
        name: name.to_string(),
        handle,
    })
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}

/// Outcome of argument parsing that did not produce a command: `--help` text
/// or an argument error.
struct InvalidArgs {
    command: &'static str,
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, io: StageIo, _env: &mut Environment) -> Result<ExitCode, ShellError> {
        if self.is_error {
            return Err(ShellError::Builtin {
                command: self.command.to_string(),
                reason: self.output.trim_end().to_string(),
            });
        }
        let mut stdout = io.stdout;
        writeln!(stdout, "{}", self.output.trim_end())
            .and_then(|_| stdout.flush())
            .map_err(|e| ShellError::builtin(self.command, e.into()))?;
        Ok(0)
    }

    fn start(self: Box<Self>, io: StageIo, env: &Environment) -> Result<Job, ShellError> {
        start_on_thread(self.command, io, env, move |io, env| self.execute(io, env))
    }
}

impl<T: BuiltinCommand> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        log::debug!("{name} dispatched to builtin");
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                command: T::name(),
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// Write the arguments to standard output, separated by single spaces.
///
/// Every argument is printed as-is, including ones that look like flags.
pub struct Echo {
    pub args: Vec<String>,
}

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Echo {
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        _stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.args.join(" "))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let dir = env::current_dir().context("cannot determine current directory")?;
        writeln!(stdout, "{}", dir.display())?;
        Ok(0)
    }
}

/// Change the current working directory.
///
/// Without a target, changes to `$HOME` (or `$USERPROFILE`). `cd -` returns to
/// the shell-local `$OLDPWD`. The previous and new directories are recorded in
/// the shell-local `OLDPWD` and `PWD` variables.
///
/// As a pipeline stage `cd` works like it would in a subshell: the target is
/// checked and printed, but neither the directory nor the variables change.
pub struct Cd {
    pub target: Option<String>,
}

impl FromArgs for Cd {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        match args {
            [] => Ok(Cd { target: None }),
            [target] => Ok(Cd {
                target: Some(target.to_string()),
            }),
            _ => Err(EarlyExit {
                output: "too many arguments".to_string(),
                status: Err(()),
            }),
        }
    }
}

impl Cd {
    fn home_dir(env: &Environment) -> Option<PathBuf> {
        ["HOME", "USERPROFILE"]
            .iter()
            .filter_map(|key| env.get_var(key))
            .find(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }

    /// Where `cd` would go from `current`. Only the shell's own `OLDPWD` counts;
    /// one inherited from the parent process is ignored.
    fn target_dir(&self, env: &Environment, current: &Path) -> Result<PathBuf> {
        match self.target.as_deref() {
            Some("-") => Ok(env
                .vars
                .get("OLDPWD")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| current.to_path_buf())),
            Some("") => bail!("empty directory"),
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Self::home_dir(env).context("HOME not set"),
        }
    }
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let previous = env::current_dir().context("cannot determine current directory")?;
        let target = self.target_dir(env, &previous)?;

        env::set_current_dir(&target).with_context(|| target.display().to_string())?;
        let current = env::current_dir().context("cannot determine current directory")?;

        env.set_var("OLDPWD", previous.to_string_lossy());
        env.set_var("PWD", current.to_string_lossy());
        writeln!(stdout, "{}", current.display())?;
        Ok(0)
    }

    fn execute_in_pipeline(
        self,
        _stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let current = env::current_dir().context("cannot determine current directory")?;
        let target = self.target_dir(env, &current)?;
        let resolved = current
            .join(&target)
            .canonicalize()
            .with_context(|| target.display().to_string())?;
        if !resolved.is_dir() {
            bail!("{}: Not a directory", target.display());
        }
        writeln!(stdout, "{}", resolved.display())?;
        Ok(0)
    }
}

/// Stop the shell. Arguments are ignored.
pub struct Exit {}

impl FromArgs for Exit {
    fn from_args(_command_name: &[&str], _args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Exit {})
    }
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: Option<&mut dyn Read>,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(EXIT_SENTINEL)
    }
}

#[derive(FromArgs)]
/// Count lines, words and bytes.
pub struct WC {
    #[argh(positional, greedy)]
    /// files to count; piped input is counted when none are given.
    pub files: Vec<String>,
}

impl WC {
    /// Lines are `\n` bytes, words are whitespace-separated runs.
    fn counts(data: &[u8]) -> (usize, usize, usize) {
        let lines = data.iter().filter(|&&b| b == b'\n').count();
        let words = String::from_utf8_lossy(data).split_whitespace().count();
        (lines, words, data.len())
    }
}

impl BuiltinCommand for WC {
    fn name() -> &'static str {
        "wc"
    }

    fn execute(
        self,
        stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.files.is_empty() {
            let input = stdin.context("missing file operand")?;
            let mut buf = Vec::new();
            input.read_to_end(&mut buf).context("stdin")?;
            let (lines, words, bytes) = Self::counts(&buf);
            writeln!(stdout, "{lines} {words} {bytes}")?;
            return Ok(0);
        }
        for fname in &self.files {
            let data = fs::read(fname).with_context(|| fname.clone())?;
            let (lines, words, bytes) = Self::counts(&data);
            writeln!(stdout, "{lines} {words} {bytes} {fname}")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print file(s) to stdout.
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print; piped input is copied when none are given.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn execute(
        self,
        stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.files.is_empty() {
            let input = stdin.context("missing file operand")?;
            io::copy(input, stdout)?;
            return Ok(0);
        }
        for fname in &self.files {
            let mut f = fs::File::open(fname).with_context(|| fname.clone())?;
            io::copy(&mut f, stdout)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List directory entries sorted by name.
pub struct Ls {
    #[argh(positional)]
    /// directory to list; defaults to the current directory.
    pub dir: Option<String>,
}

impl BuiltinCommand for Ls {
    fn name() -> &'static str {
        "ls"
    }

    fn execute(
        self,
        _stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let dir = self.dir.as_deref().unwrap_or(".");
        let mut names = fs::read_dir(dir)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                    .collect::<io::Result<Vec<_>>>()
            })
            .with_context(|| dir.to_string())?;
        names.sort();
        for name in names {
            writeln!(stdout, "{name}")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print lines matching a pattern.
pub struct Grep {
    #[argh(positional)]
    /// the pattern to search for (a regular expression)
    pub pattern: String,

    #[argh(positional)]
    /// file to search; piped input is searched when omitted.
    pub file: Option<String>,

    #[argh(switch, short = 'w')]
    /// match only whole words
    pub word: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(option, short = 'A', default = "0")]
    /// print NUM lines of trailing context after matching lines
    pub after: usize,
}

impl Grep {
    fn regex(&self) -> Result<Regex> {
        let pattern = if self.word {
            format!(r"\b({})\b", self.pattern)
        } else {
            self.pattern.clone()
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(self.ignore_case)
            .build()
            .with_context(|| format!("invalid regex pattern: {}", self.pattern))
    }

    /// Selects matching lines plus their trailing context.
    ///
    /// A match re-arms the context counter to the larger of what is left and
    /// `after`, so overlapping windows merge instead of restarting.
    fn scan(&self, re: &Regex, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut trailing = 0;
        for line in split_lines(data) {
            if re.is_match(line) {
                trailing = trailing.max(self.after);
            } else if trailing > 0 {
                trailing -= 1;
            } else {
                continue;
            }
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        out
    }
}

/// Lines without their terminators; a final `\n` does not start an extra line.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    let body = data.strip_suffix(b"\n").unwrap_or(data);
    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

impl BuiltinCommand for Grep {
    fn name() -> &'static str {
        "grep"
    }

    fn execute(
        self,
        stdin: Option<&mut dyn Read>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let data = match (&self.file, stdin) {
            (Some(file), _) => fs::read(file).with_context(|| file.clone())?,
            (None, Some(input)) => {
                let mut buf = Vec::new();
                input.read_to_end(&mut buf).context("stdin")?;
                buf
            }
            (None, None) => bail!("usage: grep [-w] [-i] [-A NUM] <pattern> <filename>"),
        };
        let re = self.regex()?;

        // The whole input is scanned before anything is written.
        stdout.write_all(&self.scan(&re, &data))?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{CapturedStreams, MemReader, StandardStreams};
    use serial_test::serial;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn run_builtin<T: BuiltinCommand>(
        cmd: T,
        input: Option<&str>,
        env: &mut Environment,
    ) -> (Result<ExitCode>, String) {
        let mut out = Vec::new();
        let mut cursor = input.map(|s| Cursor::new(s.as_bytes().to_vec()));
        let res = BuiltinCommand::execute(
            cmd,
            cursor.as_mut().map(|c| c as &mut dyn Read),
            &mut out,
            env,
        );
        (res, String::from_utf8(out).unwrap())
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("write fixture");
        path.to_string_lossy().into_owned()
    }

    /// Goes through argument parsing and the `ExecutableCommand` layer.
    fn dispatch<T: BuiltinCommand>(
        args: &[&str],
        input: Option<&[u8]>,
    ) -> (Result<ExitCode, ShellError>, String) {
        let streams = CapturedStreams::new();
        let env = Environment::new();
        let cmd = Factory::<T>::default()
            .try_create(&env, T::name(), args)
            .expect("factory recognizes its own name");
        let io = StageIo {
            stdin: match input {
                Some(bytes) => Box::new(MemReader::new(bytes.to_vec())),
                None => streams.stdin(),
            },
            stdout: streams.stdout(),
            stderr: streams.stderr(),
        };
        let res = cmd.execute(io, &mut Environment::new());
        (res, streams.stdout_string())
    }

    #[test]
    #[serial]
    fn test_pwd_prints_current_dir() {
        let cur = env::current_dir().unwrap();
        let (res, out) = run_builtin(Pwd {}, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, format!("{}\n", cur.display()));
    }

    #[test]
    fn test_echo_joins_args() {
        let echo = Echo {
            args: vec!["hello".to_string(), "world".to_string()],
        };
        let (res, out) = run_builtin(echo, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "hello world\n");

        let (res, out) = run_builtin(Echo { args: Vec::new() }, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "\n");
    }

    #[test]
    fn test_echo_never_rejects_flags() {
        let (res, out) = dispatch::<Echo>(&["-n", "--help", "x"], None);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "-n --help x\n");
    }

    #[test]
    fn test_exit_returns_sentinel_and_requests_exit() {
        let mut env = Environment::new();
        let (res, out) = run_builtin(Exit {}, None, &mut env);
        assert_eq!(res.unwrap(), EXIT_SENTINEL);
        assert!(env.should_exit);
        assert!(out.is_empty());
    }

    struct CwdGuard(PathBuf);

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            env::set_current_dir(&self.0).expect("failed to restore cwd");
        }
    }

    fn guard_cwd() -> CwdGuard {
        CwdGuard(env::current_dir().unwrap())
    }

    #[test]
    #[serial]
    fn test_cd_to_absolute_path() {
        let _guard = guard_cwd();
        let orig = env::current_dir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();

        let mut shell_env = Environment::new();
        let cmd = Cd {
            target: Some(canonical_temp.to_string_lossy().into_owned()),
        };
        let (res, out) = run_builtin(cmd, None, &mut shell_env);
        assert_eq!(res.unwrap(), 0);

        let new_cwd = fs::canonicalize(env::current_dir().unwrap()).unwrap();
        assert_eq!(new_cwd, canonical_temp);
        assert_eq!(out, format!("{}\n", env::current_dir().unwrap().display()));
        assert_eq!(shell_env.get("OLDPWD"), orig.to_string_lossy());
        assert_eq!(
            shell_env.get("PWD"),
            env::current_dir().unwrap().to_string_lossy()
        );
    }

    #[test]
    #[serial]
    fn test_cd_to_home_when_none() {
        let _guard = guard_cwd();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();

        let mut shell_env = Environment::new();
        shell_env.set_var("HOME", canonical_temp.to_string_lossy().into_owned());

        let (res, _) = run_builtin(Cd { target: None }, None, &mut shell_env);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(
            fs::canonicalize(env::current_dir().unwrap()).unwrap(),
            canonical_temp
        );
    }

    #[test]
    #[serial]
    fn test_cd_without_home_fails() {
        let _guard = guard_cwd();
        let orig = env::current_dir().unwrap();
        let mut shell_env = Environment::new();
        shell_env.set_var("HOME", "");
        shell_env.set_var("USERPROFILE", "");

        let (res, _) = run_builtin(Cd { target: None }, None, &mut shell_env);
        let err = res.unwrap_err();
        assert_eq!(format!("{err:#}"), "HOME not set");
        assert_eq!(env::current_dir().unwrap(), orig);
    }

    #[test]
    #[serial]
    fn test_cd_dash_goes_back() {
        let _guard = guard_cwd();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let first_path = fs::canonicalize(first.path()).unwrap();
        let second_path = fs::canonicalize(second.path()).unwrap();

        let mut shell_env = Environment::new();
        for dir in [&first_path, &second_path] {
            let cd = Cd {
                target: Some(dir.to_string_lossy().into_owned()),
            };
            assert_eq!(run_builtin(cd, None, &mut shell_env).0.unwrap(), 0);
        }

        let back = Cd {
            target: Some("-".to_string()),
        };
        let (res, out) = run_builtin(back, None, &mut shell_env);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, format!("{}\n", first_path.display()));
        assert_eq!(env::current_dir().unwrap(), first_path);
        assert_eq!(shell_env.get("OLDPWD"), second_path.to_string_lossy());
    }

    #[test]
    #[serial]
    fn test_cd_nonexistent_path_errors() {
        let _guard = guard_cwd();
        let orig = env::current_dir().unwrap();
        let mut shell_env = Environment::new();

        let name = format!("nonexistent_dir_for_minishell_test_{}", std::process::id());
        let (res, _) = run_builtin(Cd { target: Some(name) }, None, &mut shell_env);

        assert!(res.is_err());
        assert_eq!(env::current_dir().unwrap(), orig);
        assert!(!shell_env.vars.contains_key("OLDPWD"));
    }

    #[test]
    #[serial]
    fn test_cd_empty_operand_is_rejected() {
        let _guard = guard_cwd();
        let orig = env::current_dir().unwrap();
        let mut shell_env = Environment::new();

        let (res, out) = dispatch::<Cd>(&[""], None);
        assert_eq!(res.unwrap_err().to_string(), "cd: empty directory");
        assert!(out.is_empty());

        let cmd = Cd {
            target: Some(String::new()),
        };
        assert!(run_builtin(cmd, None, &mut shell_env).0.is_err());
        assert_eq!(env::current_dir().unwrap(), orig);
        assert!(shell_env.vars.is_empty());
    }

    #[test]
    #[serial]
    fn test_cd_dash_ignores_inherited_oldpwd() {
        let _guard = guard_cwd();
        let orig = env::current_dir().unwrap();
        let mut shell_env = Environment::new();

        let back = Cd {
            target: Some("-".to_string()),
        };
        let (res, out) = run_builtin(back, None, &mut shell_env);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(env::current_dir().unwrap(), orig);
        assert_eq!(out, format!("{}\n", orig.display()));
    }

    #[test]
    #[serial]
    fn test_cd_in_pipeline_leaves_session_alone() {
        let _guard = guard_cwd();
        let orig = env::current_dir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let mut shell_env = Environment::new();

        let cmd = Cd {
            target: Some(temp.path().to_string_lossy().into_owned()),
        };
        let mut out = Vec::new();
        let res = cmd.execute_in_pipeline(None, &mut out, &mut shell_env);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{}\n", canonical_temp.display())
        );
        assert_eq!(env::current_dir().unwrap(), orig);
        assert!(shell_env.vars.is_empty());
    }

    #[test]
    fn test_cd_in_pipeline_still_checks_target() {
        let temp = tempfile::tempdir().unwrap();
        let file = write_file(&temp, "plain.txt", "");
        let mut shell_env = Environment::new();

        let missing = Cd {
            target: Some(format!("{}/nope", temp.path().display())),
        };
        assert!(missing.execute_in_pipeline(None, &mut io::sink(), &mut shell_env).is_err());

        let not_dir = Cd {
            target: Some(file.clone()),
        };
        let err = not_dir
            .execute_in_pipeline(None, &mut io::sink(), &mut shell_env)
            .unwrap_err();
        assert_eq!(format!("{err:#}"), format!("{file}: Not a directory"));
    }

    #[test]
    fn test_cd_too_many_arguments() {
        let (res, _) = dispatch::<Cd>(&["a", "b"], None);
        assert_eq!(res.unwrap_err().to_string(), "cd: too many arguments");
    }

    #[test]
    fn test_cat_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "cat.txt", "hello\nworld\n");

        let (res, out) = run_builtin(Cat { files: vec![file] }, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "hello\nworld\n");
    }

    #[test]
    fn test_cat_missing_file_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt").to_string_lossy().into_owned();

        let (res, out) = dispatch::<Cat>(&[&missing], None);
        let err = res.unwrap_err();
        assert!(err.to_string().starts_with(&format!("cat: {missing}: ")));
        assert!(out.is_empty());
    }

    #[test]
    fn test_cat_needs_operand_without_pipe() {
        let (res, _) = run_builtin(Cat { files: Vec::new() }, None, &mut Environment::new());
        assert_eq!(format!("{:#}", res.unwrap_err()), "missing file operand");
    }

    #[test]
    fn test_cat_reads_piped_stdin_when_no_args() {
        let (res, out) = run_builtin(
            Cat { files: Vec::new() },
            Some("from stdin\nline2\n"),
            &mut Environment::new(),
        );
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "from stdin\nline2\n");
    }

    #[test]
    fn test_wc_counts_file() {
        let dir = tempfile::tempdir().unwrap();
        // two lines, three words, bytes include newlines
        let file = write_file(&dir, "wc.txt", "one two\nthree\n");

        let (res, out) = run_builtin(
            WC {
                files: vec![file.clone()],
            },
            None,
            &mut Environment::new(),
        );
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, format!("2 3 14 {file}\n"));
    }

    #[test]
    fn test_wc_counts_newlines_not_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "partial.txt", "a b\nc  d e");

        let (_, out) = run_builtin(
            WC {
                files: vec![file.clone()],
            },
            None,
            &mut Environment::new(),
        );
        assert_eq!(out, format!("1 5 10 {file}\n"));
    }

    #[test]
    fn test_wc_counts_piped_stdin_when_no_args() {
        let (res, out) = run_builtin(
            WC { files: Vec::new() },
            Some("a b c\n"),
            &mut Environment::new(),
        );
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "1 3 6\n");
    }

    #[test]
    fn test_wc_missing_operand_and_file() {
        let (res, _) = run_builtin(WC { files: Vec::new() }, None, &mut Environment::new());
        assert!(res.is_err());

        let (res, _) = dispatch::<WC>(&["/definitely/not/here.txt"], None);
        assert!(res.unwrap_err().to_string().starts_with("wc: /definitely/not/here.txt: "));
    }

    #[test]
    fn test_wc_multiple_files_output_contains_each_filename() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_file(&dir, "one", "a b\n");
        let f2 = write_file(&dir, "two", "c\n");

        let (res, out) = run_builtin(
            WC {
                files: vec![f1.clone(), f2.clone()],
            },
            None,
            &mut Environment::new(),
        );
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, format!("1 2 4 {f1}\n1 1 2 {f2}\n"));
    }

    #[test]
    fn test_ls_sorts_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["beta", "Alpha", ".hidden", "alpha"] {
            write_file(&dir, name, "");
        }
        fs::create_dir(dir.path().join("gamma")).unwrap();

        let ls = Ls {
            dir: Some(dir.path().to_string_lossy().into_owned()),
        };
        let (res, out) = run_builtin(ls, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, ".hidden\nAlpha\nalpha\nbeta\ngamma\n");
    }

    #[test]
    #[serial]
    fn test_ls_defaults_to_current_dir() {
        let _guard = guard_cwd();
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "only.txt", "");
        env::set_current_dir(dir.path()).unwrap();

        let (res, out) = run_builtin(Ls { dir: None }, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "only.txt\n");
    }

    #[test]
    fn test_ls_unreadable_dir_fails() {
        let (res, _) = dispatch::<Ls>(&["/definitely/not/a/dir"], None);
        assert!(res.unwrap_err().to_string().starts_with("ls: /definitely/not/a/dir: "));
    }

    fn grep(pattern: &str, file: Option<String>) -> Grep {
        Grep {
            pattern: pattern.to_string(),
            file,
            word: false,
            ignore_case: false,
            after: 0,
        }
    }

    #[test]
    fn test_grep_ignore_case() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "data.txt", "Target 1\nTaRgEt 2\nNo match\n");

        let cmd = Grep {
            ignore_case: true,
            ..grep("target", Some(file))
        };
        let (res, out) = run_builtin(cmd, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "Target 1\nTaRgEt 2\n");
    }

    #[test]
    fn test_grep_word_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "data.txt", "a test line\ntesting\ncontest\ntest\n");

        let cmd = Grep {
            word: true,
            ..grep("test", Some(file))
        };
        let (_, out) = run_builtin(cmd, None, &mut Environment::new());
        assert_eq!(out, "a test line\ntest\n");
    }

    #[test]
    fn test_grep_trailing_context_a_1() {
        let dir = tempfile::tempdir().unwrap();
        let content = "Line 1\nMATCH 1\nLine 3\nLine 4\nMATCH 2\nLine 6\nLine 7\nLine 8\n";
        let file = write_file(&dir, "data.txt", content);

        let cmd = Grep {
            after: 1,
            ..grep("MATCH", Some(file))
        };
        let (res, out) = run_builtin(cmd, None, &mut Environment::new());
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "MATCH 1\nLine 3\nMATCH 2\nLine 6\n");
    }

    #[test]
    fn test_grep_window_extends_over_next_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "data.txt", "match_a\nother\nmatch_b\nother2\n");

        let cmd = Grep {
            after: 1,
            ..grep("match", Some(file))
        };
        let (_, out) = run_builtin(cmd, None, &mut Environment::new());
        assert_eq!(out, "match_a\nother\nmatch_b\nother2\n");
    }

    #[test]
    fn test_grep_context_overlap_a_2() {
        let dir = tempfile::tempdir().unwrap();
        let content = "MATCH 1\nLine 2\nMATCH 2\nLine 4\nLine 5\nLine 6\n";
        let file = write_file(&dir, "data.txt", content);

        let cmd = Grep {
            after: 2,
            ..grep("MATCH", Some(file))
        };
        let (_, out) = run_builtin(cmd, None, &mut Environment::new());
        assert_eq!(out, "MATCH 1\nLine 2\nMATCH 2\nLine 4\nLine 5\n");
    }

    #[test]
    fn test_grep_flags_through_argument_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "data.txt", "FOO bar\nfoobar\nzip\nzap\n");

        let (res, out) = dispatch::<Grep>(&["-i", "--after", "1", "foo", &file], None);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "FOO bar\nfoobar\nzip\n");

        let (_, out) = dispatch::<Grep>(&["--word", "--ignore-case", "-A", "0", "foo", &file], None);
        assert_eq!(out, "FOO bar\n");
    }

    #[test]
    fn test_grep_stdin_pipe() {
        let (res, out) = dispatch::<Grep>(&["pipe"], Some(b"Line 1\nLine with pipe target\r\nLine 3"));
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, "Line with pipe target\n");
    }

    #[test]
    fn test_grep_usage_errors() {
        let (res, _) = dispatch::<Grep>(&["pattern"], None);
        assert!(res.unwrap_err().to_string().starts_with("grep: usage:"));

        let (res, _) = dispatch::<Grep>(&[], None);
        assert!(res.unwrap_err().to_string().starts_with("grep: "));

        let (res, _) = dispatch::<Grep>(&["-A", "x", "p", "f"], None);
        assert!(res.is_err());
    }

    #[test]
    fn test_grep_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "data.txt", "x\n");
        let (res, out) = dispatch::<Grep>(&["(unclosed", &file], None);
        assert!(res.unwrap_err().to_string().starts_with("grep: invalid regex pattern: (unclosed"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_grep_unreadable_file() {
        let (res, _) = dispatch::<Grep>(&["x", "/definitely/not/here"], None);
        assert!(res.is_err());
    }

    #[test]
    fn test_help_goes_to_stdout() {
        let (res, out) = dispatch::<Grep>(&["--help"], None);
        assert_eq!(res.unwrap(), 0);
        assert!(out.contains("Usage: grep"), "got {out}");
    }

    #[test]
    fn test_pwd_rejects_arguments() {
        let (res, _) = dispatch::<Pwd>(&["extra"], None);
        assert!(res.unwrap_err().to_string().starts_with("pwd: "));
    }

    #[test]
    fn test_split_lines() {
        assert!(split_lines(b"").is_empty());
        assert_eq!(split_lines(b"\n"), vec![&b""[..]]);
        assert_eq!(split_lines(b"a\r\nb"), vec![&b"a"[..], &b"b"[..]]);
    }
}
