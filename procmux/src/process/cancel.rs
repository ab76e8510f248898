//! Cancellation as a third event source.
//!
//! A cancel handle is a self-pipe like the termination channel: firing it
//! writes one byte, and an invocation running with the handle has the read
//! end in its readiness set.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::pipe::{Pipe, PipeRole};
use crate::error::Result;

#[derive(Debug)]
struct CancelPipe {
    read: File,
    write: File,
    fired: AtomicBool,
}

/// Cloneable trigger that stops one invocation.
///
/// Once fired a handle stays fired, so use a fresh handle per invocation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<CancelPipe>,
}

impl CancelHandle {
    pub fn new() -> Result<Self> {
        let (read, write) = Pipe::new(PipeRole::Cancel)?.into_files();
        Ok(Self {
            inner: Arc::new(CancelPipe {
                read,
                write,
                fired: AtomicBool::new(false),
            }),
        })
    }

    /// Fire the handle. Only the first call writes.
    pub fn cancel(&self) -> io::Result<()> {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        (&self.inner.write).write_all(b"\n")
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.read.as_fd()
    }
}
