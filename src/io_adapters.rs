use crate::command::{Stdin, Stdout};
use std::io::{self, Cursor, Read, Result as IoResult, Write};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

/// Source of the standard streams the interpreter hands to commands.
///
/// Each call returns a fresh handle, because every stage of a pipeline owns
/// its own streams.
pub trait StandardStreams {
    fn stdin(&self) -> Box<dyn Stdin>;
    fn stdout(&self) -> Box<dyn Stdout>;
    fn stderr(&self) -> Box<dyn Stdout>;
}

/// The streams of the shell process itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStreams;

impl StandardStreams for ProcessStreams {
    fn stdin(&self) -> Box<dyn Stdin> {
        Box::new(InheritedStdin(io::stdin()))
    }

    fn stdout(&self) -> Box<dyn Stdout> {
        Box::new(io::stdout())
    }

    fn stderr(&self) -> Box<dyn Stdout> {
        Box::new(io::stderr())
    }
}

/// Streams backed by memory, for driving the interpreter from tests or an
/// embedding program.
///
/// Stdin is empty and not piped. Output written by built-ins is collected;
/// external programs get a null sink instead.
#[derive(Clone, Default)]
pub struct CapturedStreams {
    stdout: MemWriter,
    stderr: MemWriter,
}

impl CapturedStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout_string(&self) -> String {
        self.stdout.contents_lossy()
    }

    pub fn stderr_string(&self) -> String {
        self.stderr.contents_lossy()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.stdout.clear();
        self.stderr.clear();
    }
}

impl StandardStreams for CapturedStreams {
    fn stdin(&self) -> Box<dyn Stdin> {
        Box::new(NullStdin)
    }

    fn stdout(&self) -> Box<dyn Stdout> {
        Box::new(self.stdout.clone())
    }

    fn stderr(&self) -> Box<dyn Stdout> {
        Box::new(self.stderr.clone())
    }
}

/// The terminal (or whatever the shell was started with) as seen by a command.
pub struct InheritedStdin(pub io::Stdin);

impl Read for InheritedStdin {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.0.read(buf)
    }
}

impl Stdin for InheritedStdin {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::inherit()
    }

    fn is_pipe(&self) -> bool {
        false
    }
}

/// Input that is always at EOF.
pub struct NullStdin;

impl Read for NullStdin {
    fn read(&mut self, _buf: &mut [u8]) -> IoResult<usize> {
        Ok(0)
    }
}

impl Stdin for NullStdin {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::null()
    }

    fn is_pipe(&self) -> bool {
        false
    }
}

/// Memory-backed reader that behaves like a pipe for builtins.
pub struct MemReader {
    cursor: Cursor<Vec<u8>>,
}

impl MemReader {
    /// Create a MemReader that will read from the provided buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(buf),
        }
    }
}

impl Read for MemReader {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        self.cursor.read(out)
    }
}

impl Stdin for MemReader {
    /// For in-memory reader return Stdio::null() because this adapter is used
    /// only for builtin commands executed in-process.
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::null()
    }
}

/// Memory-backed writer for capturing output from builtins.
///
/// Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        // A writer never panics while holding the lock, so poisoning only
        // means some unrelated thread died; the bytes are still usable.
        self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

impl Stdout for MemWriter {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::null()
    }
}
