//! Unidirectional OS pipes with owned ends.

use std::fmt;
use std::fs::File;
use std::os::fd::OwnedFd;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::error::{Error, Result};

/// What a pipe is used for. Only shows up in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeRole {
    Stdin,
    Stdout,
    Stderr,
    Terminate,
    Cancel,
}

impl fmt::Display for PipeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Terminate => "termination signal",
            Self::Cancel => "cancellation",
        };
        f.write_str(name)
    }
}

/// A freshly created pipe.
///
/// Both ends carry `O_CLOEXEC`, so a concurrent fork+exec elsewhere in the
/// host never inherits them. Each end is closed when dropped.
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    /// Create a pipe for `role`.
    pub fn new(role: PipeRole) -> Result<Self> {
        let (read, write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|source| Error::Pipe { role, source })?;
        Ok(Self { read, write })
    }

    /// Split into `(read, write)` files.
    pub fn into_files(self) -> (File, File) {
        (File::from(self.read), File::from(self.write))
    }
}
