//! The multiplexing event loop.
//!
//! One blocking `poll` covers the termination pipe, the child's stdout and,
//! when the caller asked for it, a cancellation pipe. Each wakeup either
//! forwards a chunk of stdout or ends the loop. Priority on a shared
//! wakeup: termination, then cancellation, then stdout.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace, warn};

use super::options::TrailingOutput;
use crate::error::{Error, Result};

/// Pause before re-polling after a read that returned nothing although the
/// descriptor was reported ready and not hung up.
pub const SPURIOUS_READ_BACKOFF: Duration = Duration::from_millis(50);

/// Upper bound on stdout drained after termination under
/// [`TrailingOutput::Drain`]. Keeps a grandchild that inherited stdout from
/// holding the loop open.
const TRAILING_DRAIN_LIMIT: usize = 1 << 20;

const TERMINATE: usize = 0;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The termination pipe became readable or hung up.
    Terminated,
    /// Reading stdout failed.
    StdoutClosed,
    /// The cancellation pipe became readable.
    Cancelled,
}

enum StdoutRead {
    Data(usize),
    Empty,
    Failed(io::Error),
}

/// Sink side of the loop. Keeps the first write error and discards output
/// from then on, so the child can still run to completion.
struct Forwarder<W> {
    sink: W,
    forwarded: u64,
    error: Option<io::Error>,
}

impl<W: Write> Forwarder<W> {
    fn forward(&mut self, chunk: &[u8]) {
        if self.error.is_some() {
            return;
        }
        match self.sink.write_all(chunk).and_then(|()| self.sink.flush()) {
            Ok(()) => self.forwarded += chunk.len() as u64,
            Err(err) => {
                warn!(%err, "failed to forward child output, discarding the rest");
                self.error = Some(err);
            }
        }
    }
}

/// Event loop over borrowed descriptors. The caller keeps ownership of
/// every descriptor and closes them after [`Multiplexer::run`] returns.
pub struct Multiplexer<'a, W> {
    terminate: BorrowedFd<'a>,
    stdout: &'a File,
    cancel: Option<BorrowedFd<'a>>,
    policy: TrailingOutput,
    buf: Vec<u8>,
    out: Forwarder<W>,
}

impl<'a, W: Write> Multiplexer<'a, W> {
    /// Register the termination read end and the stdout read end.
    pub fn new(
        terminate: BorrowedFd<'a>,
        stdout: &'a File,
        sink: W,
        policy: TrailingOutput,
        read_size: usize,
    ) -> Self {
        Self {
            terminate,
            stdout,
            cancel: None,
            policy,
            buf: vec![0; read_size.max(1)],
            out: Forwarder {
                sink,
                forwarded: 0,
                error: None,
            },
        }
    }

    /// Also wake up when `cancel` becomes readable.
    #[must_use]
    pub const fn with_cancel(mut self, cancel: BorrowedFd<'a>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Bytes written to the sink so far.
    pub const fn forwarded(&self) -> u64 {
        self.out.forwarded
    }

    /// Block until the child is reported gone, stdout breaks, or
    /// cancellation fires.
    ///
    /// Once the child hangs up its stdout, only the termination and
    /// cancellation pipes are polled.
    pub fn run(&mut self) -> Result<LoopExit> {
        let stdout = self.stdout;
        let mut stdout_open = true;

        loop {
            let mut fds = vec![PollFd::new(self.terminate, PollFlags::POLLIN)];
            let stdout_slot = stdout_open.then(|| watch(&mut fds, stdout.as_fd()));
            let cancel_slot = self.cancel.map(|cancel| watch(&mut fds, cancel));

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(Error::Poll(err)),
            }

            if is_ready(&fds, TERMINATE) {
                debug!("poll confirms the child has exited");
                if self.policy == TrailingOutput::Drain {
                    self.drain_stdout();
                }
                return Ok(LoopExit::Terminated);
            }

            if cancel_slot.is_some_and(|slot| is_ready(&fds, slot)) {
                debug!("cancellation requested");
                return Ok(LoopExit::Cancelled);
            }

            let Some(slot) = stdout_slot.filter(|&slot| is_ready(&fds, slot)) else {
                continue;
            };
            let hung_up = revents(&fds, slot).contains(PollFlags::POLLHUP);
            match self.read_stdout() {
                StdoutRead::Data(n) => {
                    trace!(bytes = n, "forwarding stdout");
                    self.out.forward(&self.buf[..n]);
                }
                StdoutRead::Empty if hung_up => {
                    debug!("child closed stdout, waiting for termination");
                    stdout_open = false;
                }
                StdoutRead::Empty => {
                    trace!("stdout ready but nothing read, backing off");
                    thread::sleep(SPURIOUS_READ_BACKOFF);
                }
                StdoutRead::Failed(err) => {
                    debug!(%err, "cannot read stdout, assuming the child is gone");
                    return Ok(LoopExit::StdoutClosed);
                }
            }
        }
    }

    /// Give back the sink, the forwarded byte count and the first sink
    /// error, if any.
    pub fn into_parts(self) -> (W, u64, Option<io::Error>) {
        (self.out.sink, self.out.forwarded, self.out.error)
    }

    fn read_stdout(&mut self) -> StdoutRead {
        let mut stdout = self.stdout;
        loop {
            match stdout.read(&mut self.buf) {
                Ok(0) => return StdoutRead::Empty,
                Ok(n) => return StdoutRead::Data(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return StdoutRead::Empty
                }
                Err(err) => return StdoutRead::Failed(err),
            }
        }
    }

    fn drain_stdout(&mut self) {
        let before = self.out.forwarded;
        let out = &mut self.out;
        drain_buffered(self.stdout, &mut self.buf, TRAILING_DRAIN_LIMIT, |chunk| {
            out.forward(chunk);
        });
        if self.out.forwarded > before {
            debug!(bytes = self.out.forwarded - before, "drained trailing stdout");
        }
    }
}

/// Add `fd` to the poll set and return its slot.
fn watch<'f>(fds: &mut Vec<PollFd<'f>>, fd: BorrowedFd<'f>) -> usize {
    fds.push(PollFd::new(fd, PollFlags::POLLIN));
    fds.len() - 1
}

fn revents(fds: &[PollFd<'_>], index: usize) -> PollFlags {
    fds.get(index)
        .and_then(|fd| fd.revents())
        .unwrap_or_else(PollFlags::empty)
}

fn is_ready(fds: &[PollFd<'_>], index: usize) -> bool {
    revents(fds, index).intersects(
        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
    )
}

/// Whether `fd` is readable or hung up right now.
pub fn ready_now(fd: BorrowedFd<'_>) -> bool {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    loop {
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(_) => return is_ready(&fds, 0),
            Err(Errno::EINTR) => {}
            Err(_) => return false,
        }
    }
}

/// Read what `file` already holds, never blocking, up to `limit` bytes.
fn drain_buffered(mut file: &File, buf: &mut [u8], limit: usize, mut chunk: impl FnMut(&[u8])) {
    let mut taken = 0;
    while taken < limit {
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) => break,
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
        let readable = fds[0]
            .revents()
            .is_some_and(|revents| revents.contains(PollFlags::POLLIN));
        if !readable {
            break;
        }

        let want = buf.len().min(limit - taken);
        match file.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => {
                taken += n;
                chunk(&buf[..n]);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}

/// Collect up to `limit` bytes already buffered in `file` without blocking.
pub fn collect_buffered(file: &File, limit: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    if limit == 0 {
        return collected;
    }
    let mut buf = vec![0; limit.min(4096)];
    drain_buffered(file, &mut buf, limit, |chunk| {
        collected.extend_from_slice(chunk);
    });
    collected
}
