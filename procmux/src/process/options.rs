//! Invocation configuration.

use std::path::PathBuf;
use std::time::Duration;

/// What to do with stdout bytes still buffered when the child is reported
/// as reaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingOutput {
    /// Forward whatever is already buffered before stopping.
    #[default]
    Drain,
    /// Stop as soon as termination is observed; a final batch may be lost.
    Drop,
}

/// Configuration options for an invocation.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// The program to execute, looked up in `PATH`.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,

    /// Deadline for the whole invocation (honored by `run_async`).
    pub timeout: Option<Duration>,

    /// Close the child's stdin right after spawning (default: false).
    pub close_stdin: bool,

    /// Trailing-output policy on termination.
    pub trailing_output: TrailingOutput,

    /// Upper bound for a single stdout read (default: 1000).
    pub read_buffer_size: usize,

    /// Upper bound for stderr collected at teardown (default: 64 KiB).
    pub stderr_limit: usize,
}

impl ProcessOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
            close_stdin: false,
            trailing_output: TrailingOutput::default(),
            read_buffer_size: 1000,
            stderr_limit: 64 * 1024,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set a deadline for the invocation.
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Give the child an already-closed stdin.
    pub const fn close_stdin(mut self) -> Self {
        self.close_stdin = true;
        self
    }

    /// Set the trailing-output policy.
    pub const fn trailing_output(mut self, policy: TrailingOutput) -> Self {
        self.trailing_output = policy;
        self
    }

    /// Set the read size; zero is bumped to one.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set how much buffered stderr to collect at teardown.
    pub const fn stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }
}
