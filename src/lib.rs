//! A small interactive shell with pipelines.
//!
//! A line is split into pipeline stages by the [`parser`], `$NAME` and `$?`
//! words are expanded by the [`substitutor`], and the [`Interpreter`] runs the
//! stages: built-in commands implemented in Rust run in-process (or on a thread
//! when they are part of a pipeline), anything else is looked up on `PATH` and
//! spawned, with OS pipes connecting neighbouring stages.
//!
//! The public modules [`command`] and [`env`] expose the traits and types for
//! implementing your own commands, and [`io_adapters`] lets an embedding program
//! capture what commands print.

mod builtin;
pub mod command;
pub mod env;
pub mod error;
mod external;
mod interpreter;
pub mod io_adapters;
pub mod lexer;
pub mod parser;
pub mod substitutor;

pub use command::{EXIT_SENTINEL, ExitCode};
pub use error::ShellError;
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
pub use lexer::Token;
pub use parser::{Pipeline, parse};
