use crate::command::{
    CommandFactory, ExecutableCommand, ExitCode, Stage, StageIo, StageOutcome, Stdin, Stdout,
};
use crate::env::Environment;
use crate::error::ShellError;
use crate::io_adapters::{ProcessStreams, StandardStreams};
use crate::parser;
use crate::substitutor::substitute;
use anyhow::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};
use std::iter;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate: every `BuiltinCommand` and the
/// `ExternalCommand` launcher.
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

/// A minimal shell: parses lines, substitutes variables and runs pipelines of
/// built-in and external commands.
///
/// The interpreter owns the session [`Environment`] and a list of
/// [`CommandFactory`] objects that are queried, in order, to create commands by
/// name. See [`Default`] for the factories included out of the box.
///
/// Example
/// ```
/// use minishell::Interpreter;
/// use minishell::io_adapters::CapturedStreams;
///
/// let streams = CapturedStreams::new();
/// let mut sh = Interpreter::default().with_streams(streams.clone());
/// assert_eq!(sh.run_line("echo hello | wc"), Some(0));
/// assert_eq!(streams.stdout_string(), "1 1 6\n");
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    streams: Box<dyn StandardStreams>,
    last_status: ExitCode,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            commands,
            streams: Box::new(ProcessStreams),
            last_status: 0,
        }
    }

    /// Replace the standard streams commands are wired to.
    pub fn with_streams(mut self, streams: impl StandardStreams + 'static) -> Self {
        self.streams = Box::new(streams);
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Whether `exit` ended the session.
    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Status of the most recent pipeline, as `$?` sees it.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    /// Status the shell process should exit with: 0 after `exit`, otherwise
    /// the status of the last pipeline.
    pub fn exit_status(&self) -> ExitCode {
        if self.env.should_exit {
            0
        } else {
            self.last_status
        }
    }

    /// Run a single command invocation by name with arguments, in-process for
    /// built-ins.
    ///
    /// Errors are returned rather than reported, and `$?` is left untouched.
    pub fn run(&mut self, name: &str, args: &[&str]) -> Result<ExitCode, ShellError> {
        let stage: Stage = iter::once(name)
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        self.run_stage(&stage)
    }

    /// Parse, substitute and execute one input line.
    ///
    /// Returns `None` when the line has nothing to run; `$?` keeps its value
    /// in that case.
    pub fn run_line(&mut self, line: &str) -> Option<ExitCode> {
        let pipeline = parser::parse(line);
        if pipeline.is_empty() {
            return None;
        }
        let stages: Vec<Stage> = pipeline
            .stages()
            .iter()
            .map(|stage| substitute(stage, self.last_status, &self.env))
            .collect();
        Some(self.execute(&stages))
    }

    /// Execute a pipeline of already substituted stages.
    ///
    /// Failures are printed to the interpreter's stderr and turned into status
    /// 1. The result becomes the new `$?`.
    pub fn execute(&mut self, stages: &[Stage]) -> ExitCode {
        let status = match stages {
            [] => return 0,
            [stage] => self.run_stage(stage),
            _ => self.run_pipeline(stages),
        };
        let code = self.settle(status);
        log::debug!("pipeline finished with status {code}");
        self.last_status = code;
        code
    }

    /// Read-Eval-Print Loop over `rustyline`.
    ///
    /// Runs until `exit`, end of input or a terminal error. Returns the status
    /// the shell process should exit with.
    pub fn repl(&mut self, prompt: &str) -> anyhow::Result<ExitCode> {
        let mut rl = DefaultEditor::new().context("cannot open line editor")?;

        while !self.env.should_exit {
            match rl.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    self.run_line(&line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(anyhow::Error::new(err).context("cannot read input")),
            }
        }

        Ok(self.exit_status())
    }

    fn resolve(&self, stage: &[String]) -> Result<Box<dyn ExecutableCommand>, ShellError> {
        let Some((name, args)) = stage.split_first() else {
            return Err(ShellError::not_found(""));
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.commands
            .iter()
            .find_map(|factory| factory.try_create(&self.env, name, &args))
            .ok_or_else(|| ShellError::not_found(name))
    }

    fn stage_io(&self) -> StageIo {
        StageIo {
            stdin: self.streams.stdin(),
            stdout: self.streams.stdout(),
            stderr: self.streams.stderr(),
        }
    }

    /// A lone stage runs to completion on the calling thread, so built-ins see
    /// the session environment itself.
    fn run_stage(&mut self, stage: &[String]) -> Result<ExitCode, ShellError> {
        let cmd = self.resolve(stage)?;
        let io = self.stage_io();
        cmd.execute(io, &mut self.env)
    }

    fn run_pipeline(&mut self, stages: &[Stage]) -> Result<ExitCode, ShellError> {
        // Nothing is started unless every stage resolves.
        let commands = stages
            .iter()
            .map(|stage| self.resolve(stage))
            .collect::<Result<Vec<_>, _>>()?;

        let (readers, writers): (Vec<_>, Vec<_>) = (1..commands.len())
            .map(|_| io::pipe())
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| ShellError::Pipe {
                reason: e.to_string(),
            })?
            .into_iter()
            .unzip();

        let inputs = iter::once(self.streams.stdin())
            .chain(readers.into_iter().map(|r| Box::new(r) as Box<dyn Stdin>));
        let outputs = writers
            .into_iter()
            .map(|w| Box::new(w) as Box<dyn Stdout>)
            .chain(iter::once(self.streams.stdout()));

        let mut jobs = Vec::with_capacity(commands.len());
        let mut failure = None;
        // Pipe ends of stages that never started are dropped with the iterator,
        // so the stages already running see EOF.
        for ((cmd, stdin), stdout) in commands.into_iter().zip(inputs).zip(outputs) {
            let io = StageIo {
                stdin,
                stdout,
                stderr: self.streams.stderr(),
            };
            match cmd.start(io, &self.env) {
                Ok(job) => {
                    log::debug!("started stage {}", job.name());
                    jobs.push(job);
                }
                Err(err) => {
                    log::warn!("pipeline aborted: {err}");
                    failure = Some(err);
                    break;
                }
            }
        }

        let mut outcomes: Vec<StageOutcome> = jobs
            .into_iter()
            .map(|job| {
                let name = job.name().to_string();
                let outcome = job.wait();
                log::debug!("stage {name} finished: {:?}", outcome.status);
                outcome
            })
            .collect();

        let last = match failure {
            Some(_) => None,
            None => outcomes.pop(),
        };
        for outcome in outcomes {
            if let Err(err) = outcome.status {
                self.report(&err);
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        match last {
            Some(StageOutcome {
                status,
                exit_requested,
            }) => {
                if exit_requested {
                    self.env.should_exit = true;
                }
                status
            }
            None => Ok(0),
        }
    }

    fn settle(&self, status: Result<ExitCode, ShellError>) -> ExitCode {
        match status {
            Ok(code) => code,
            Err(err) => {
                self.report(&err);
                err.exit_code()
            }
        }
    }

    fn report(&self, err: &ShellError) {
        let mut stderr = self.streams.stderr();
        if let Err(e) = writeln!(stderr, "{err}").and_then(|_| stderr.flush()) {
            log::warn!("cannot report `{err}`: {e}");
        }
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the default set of commands:
    /// - built-ins: `echo`, `pwd`, `cd`, `exit`, `cat`, `wc`, `ls`, `grep`
    /// - external command launcher
    fn default() -> Self {
        use crate::builtin::*;
        use crate::external::ExternalCommand;
        Self::new(vec![
            Box::new(Factory::<Echo>::default()),
            Box::new(Factory::<Pwd>::default()),
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<Cat>::default()),
            Box::new(Factory::<WC>::default()),
            Box::new(Factory::<Ls>::default()),
            Box::new(Factory::<Grep>::default()),
            Box::new(Factory::<ExternalCommand>::default()),
        ])
    }
}
