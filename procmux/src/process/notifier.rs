//! Background wait on the child.
//!
//! The notifier thread blocks in `waitid` and, once the child has exited,
//! writes a single byte to the termination pipe. That byte is the only
//! thing the event loop ever learns from this thread; the exit status
//! travels back through `join`.
//!
//! The wait uses `WNOWAIT`: the child stays a zombie, and its pid stays
//! reserved, until the owner of the [`Child`](super::Child) reaps it after
//! `join`. A kill decided on before that can never reach another process.

use std::fs::File;
use std::io::Write;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace};

use super::outcome::ChildStatus;
use crate::error::{Error, Result};

/// Byte written to the termination pipe.
const TERMINATE_BYTE: u8 = b'\n';

/// Handle to the running notifier thread.
#[derive(Debug)]
pub struct TerminationNotifier {
    handle: JoinHandle<Result<ChildStatus>>,
}

impl TerminationNotifier {
    /// Start waiting for `pid` on a new thread.
    ///
    /// `signal` is the write end of the termination pipe. The thread owns
    /// it and drops it on exit, so the read end hangs up even if the wait or
    /// the write fails.
    pub fn start(pid: Pid, signal: File) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("procmux-notifier-{pid}"))
            .spawn(move || wait_and_signal(pid, signal))
            .map_err(Error::NotifierStart)?;
        Ok(Self { handle })
    }

    /// Wait for the thread and return the child's status. The child itself
    /// is left for the caller to reap.
    pub fn join(self) -> Result<ChildStatus> {
        self.handle.join().map_err(|_| Error::NotifierPanicked)?
    }
}

fn wait_and_signal(pid: Pid, mut signal: File) -> Result<ChildStatus> {
    let status = wait_exit(pid)?;
    debug!(pid = pid.as_raw(), ?status, "child exited");

    match signal.write(&[TERMINATE_BYTE]) {
        Ok(1) => Ok(status),
        Ok(_) => Err(Error::SignalWrite {
            pid: pid.as_raw(),
            source: std::io::ErrorKind::WriteZero.into(),
        }),
        Err(source) => Err(Error::SignalWrite {
            pid: pid.as_raw(),
            source,
        }),
    }
}

/// Block until `pid` has exited or was killed, without reaping it.
fn wait_exit(pid: Pid) -> Result<ChildStatus> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(pid), flags) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildStatus::Exited { code }),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ChildStatus::Signaled {
                    signal: signal as i32,
                })
            }
            Ok(other) => trace!(pid = pid.as_raw(), ?other, "ignoring wait report"),
            Err(Errno::EINTR) => {}
            Err(source) => {
                return Err(Error::Wait {
                    pid: pid.as_raw(),
                    source,
                })
            }
        }
    }
}
