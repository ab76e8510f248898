//! Results of a completed invocation.

use std::fmt;

use serde::Serialize;

/// How the child ended, as collected by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChildStatus {
    /// Normal exit with a status code.
    Exited { code: i32 },
    /// Killed by a signal.
    Signaled { signal: i32 },
}

impl ChildStatus {
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    /// Exit code, if the child exited normally.
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(code),
            Self::Signaled { .. } => None,
        }
    }

    /// Shell-style status: the exit code, or 128 + signal number.
    pub const fn shell_code(self) -> i32 {
        match self {
            Self::Exited { code } => code,
            Self::Signaled { signal } => 128 + signal,
        }
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled { signal } => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// The termination notifier reported the child as reaped.
    ChildExited,
    /// Reading the child's stdout failed; treated as the child being gone.
    StdoutClosed,
    /// A cancel handle fired.
    Cancelled,
    /// The invocation deadline passed.
    TimedOut,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ChildExited => "child exited",
            Self::StdoutClosed => "stdout closed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed out",
        };
        f.write_str(text)
    }
}

/// Result from a completed invocation.
#[derive(Debug)]
pub struct Outcome {
    /// Process id the child had while it was alive.
    pub pid: i32,

    /// Exit status of the child.
    pub status: ChildStatus,

    /// What ended the event loop.
    pub cause: TerminationCause,

    /// Number of stdout bytes written to the sink.
    pub bytes_forwarded: u64,

    /// Stderr bytes still buffered in the pipe at teardown.
    pub stderr: Vec<u8>,
}

impl Outcome {
    /// Check if the child exited successfully and was not cut short.
    pub fn success(&self) -> bool {
        self.status.success()
            && matches!(
                self.cause,
                TerminationCause::ChildExited | TerminationCause::StdoutClosed
            )
    }

    /// Get the exit code, if available.
    pub const fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Get captured stderr as a string.
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
