//! Child process launching.
//!
//! Creates the stdin/stdout/stderr pipes, forks, and in the child wires the
//! child-side ends onto descriptors 0/1/2 before replacing the process image.
//! Everything the child needs is prepared before `fork`: after it, the child
//! only makes raw system calls and never allocates or returns.

use std::ffi::{c_char, CString};
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{close, dup2, fork, ForkResult, Pid};
use tracing::{debug, warn};

use super::options::ProcessOptions;
use super::pipe::{Pipe, PipeRole};
use crate::error::{Error, Result};

/// Exit status of a child that could not exec its program.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Command line and diagnostics converted for use between fork and exec.
/// The diagnostics are prefixes; the child appends the errno.
struct PreparedCommand {
    // Owns the storage `argv` points into.
    _args: Vec<CString>,
    argv: Vec<*const c_char>,
    working_dir: Option<CString>,
    exec_failure: Vec<u8>,
    chdir_failure: Vec<u8>,
}

impl PreparedCommand {
    fn new(options: &ProcessOptions) -> Result<Self> {
        if options.program.is_empty() {
            return Err(Error::InvalidCommand("empty program name".into()));
        }

        let args = std::iter::once(&options.program)
            .chain(&options.args)
            .map(|arg| {
                CString::new(arg.as_bytes()).map_err(|_| {
                    Error::InvalidCommand(format!("argument contains a NUL byte: {arg:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let working_dir = options
            .working_dir
            .as_ref()
            .map(|dir| {
                CString::new(dir.as_os_str().as_bytes()).map_err(|_| {
                    Error::InvalidCommand(format!(
                        "working directory contains a NUL byte: {}",
                        dir.display()
                    ))
                })
            })
            .transpose()?;

        let mut argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(std::ptr::null());

        let exec_failure =
            format!("procmux: failed to exec `{}`: errno=", options.program).into_bytes();
        let chdir_failure = format!(
            "procmux: failed to enter working directory `{}`: errno=",
            options
                .working_dir
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default()
        )
        .into_bytes();

        Ok(Self {
            _args: args,
            argv,
            working_dir,
            exec_failure,
            chdir_failure,
        })
    }
}

/// Pipe ends the child keeps after fork.
struct ChildEnds {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
}

/// Pipe ends the parent keeps after fork.
struct ParentEnds {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
}

/// A running child and the parent's ends of its stdio pipes.
#[derive(Debug)]
pub struct Child {
    pid: Pid,
    /// Write end of the child's stdin. `None` once closed.
    pub stdin: Option<File>,
    /// Read end of the child's stdout.
    pub stdout: File,
    /// Read end of the child's stderr.
    pub stderr: File,
}

impl Child {
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Close the child's stdin so it observes EOF.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Send `SIGKILL` to the child. A child that is already gone is not an
    /// error.
    pub fn kill(&self) {
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => warn!(pid = self.pid.as_raw(), %err, "failed to kill child"),
        }
    }

    /// Collect the exited child so its pid is released. Blocks if it is
    /// still running.
    pub fn reap(&self) {
        loop {
            match waitpid(self.pid, None) {
                Ok(_) => return,
                Err(Errno::EINTR) => {}
                Err(err) => {
                    warn!(pid = self.pid.as_raw(), %err, "failed to reap child");
                    return;
                }
            }
        }
    }

    /// Kill the child and reap it on the calling thread. Only for paths
    /// where no termination notifier is waiting on the child.
    pub fn kill_and_reap(&self) {
        self.kill();
        self.reap();
    }
}

/// Spawn `options.program` with all three standard streams piped.
///
/// Pipe and fork failures are returned as `Error::Pipe` / `Error::Fork`.
/// A program that cannot be executed is not an error here: the child
/// writes a diagnostic to its stderr pipe and exits with
/// [`EXEC_FAILURE_STATUS`].
#[allow(unsafe_code)]
pub fn launch(options: &ProcessOptions) -> Result<Child> {
    let command = PreparedCommand::new(options)?;

    let stdin = Pipe::new(PipeRole::Stdin)?;
    let stdout = Pipe::new(PipeRole::Stdout)?;
    let stderr = Pipe::new(PipeRole::Stderr)?;

    let child_ends = ChildEnds {
        stdin: stdin.read,
        stdout: stdout.write,
        stderr: stderr.write,
    };
    let parent_ends = ParentEnds {
        stdin: stdin.write,
        stdout: stdout.read,
        stderr: stderr.read,
    };

    // SAFETY: the child branch touches only data prepared above, makes
    // async-signal-safe calls and leaves through exec or `_exit`.
    let forked = unsafe { fork() }.map_err(|source| Error::Fork {
        program: options.program.clone(),
        source,
    })?;

    match forked {
        ForkResult::Child => exec_child(&command, &child_ends, &parent_ends),
        ForkResult::Parent { child: pid } => {
            drop(child_ends);
            debug!(pid = pid.as_raw(), program = %options.program, "spawned child");

            let mut child = Child {
                pid,
                stdin: Some(File::from(parent_ends.stdin)),
                stdout: File::from(parent_ends.stdout),
                stderr: File::from(parent_ends.stderr),
            };
            if options.close_stdin {
                child.close_stdin();
            }
            Ok(child)
        }
    }
}

/// Runs in the forked child. Never returns.
#[allow(unsafe_code)]
fn exec_child(command: &PreparedCommand, child: &ChildEnds, parent: &ParentEnds) -> ! {
    for fd in [&parent.stdin, &parent.stdout, &parent.stderr] {
        let _ = close(fd.as_raw_fd());
    }

    let wired = redirect(child.stdin.as_raw_fd(), libc::STDIN_FILENO)
        && redirect(child.stdout.as_raw_fd(), libc::STDOUT_FILENO)
        && redirect(child.stderr.as_raw_fd(), libc::STDERR_FILENO);
    if !wired {
        child_fail(&command.exec_failure);
    }

    if let Some(dir) = &command.working_dir {
        // SAFETY: `dir` is a valid NUL-terminated string.
        if unsafe { libc::chdir(dir.as_ptr()) } != 0 {
            child_fail(&command.chdir_failure);
        }
    }

    // SAFETY: `argv` is a NULL-terminated array of pointers into live
    // CStrings; `argv[0]` is the program name.
    unsafe {
        libc::execvp(command.argv[0], command.argv.as_ptr());
    }
    child_fail(&command.exec_failure)
}

/// Make `fd` the child's descriptor `target`. The child-side ends keep
/// `O_CLOEXEC` and vanish at exec, except when one already sits on its
/// target, in which case the flag is cleared instead.
fn redirect(fd: RawFd, target: RawFd) -> bool {
    if fd == target {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).is_ok()
    } else {
        dup2(fd, target).is_ok()
    }
}

/// Report the failed call with its errno and exit. Formats into a stack
/// buffer, so nothing is allocated.
#[allow(unsafe_code)]
fn child_fail(message: &[u8]) -> ! {
    let errno = Errno::last() as i32;
    let mut digits = [0; 10];
    let digits = decimal(errno.unsigned_abs(), &mut digits);

    for part in [message, digits, &b"\n"[..]] {
        // SAFETY: plain write of a live buffer.
        unsafe {
            libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len());
        }
    }
    // SAFETY: `_exit` skips atexit handlers and destructors that belong to
    // the parent.
    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
}

/// Write `value` in decimal at the end of `buf` and return the digits.
fn decimal(mut value: u32, buf: &mut [u8; 10]) -> &[u8] {
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b"0123456789"[(value % 10) as usize];
        value /= 10;
        if value == 0 {
            return &buf[start..];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::WaitStatus;
    use std::io::Read;

    fn read_all(mut file: &File) -> String {
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_rejects_empty_program() {
        let result = launch(&ProcessOptions::new(""));
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn test_rejects_nul_in_argument() {
        let result = launch(&ProcessOptions::new("echo").arg("a\0b"));
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn test_wires_stdout_and_stderr() {
        let child = launch(
            &ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo out; echo err >&2")
                .close_stdin(),
        )
        .unwrap();

        assert_eq!(read_all(&child.stdout), "out\n");
        assert_eq!(read_all(&child.stderr), "err\n");
        assert_eq!(
            waitpid(child.pid(), None).unwrap(),
            WaitStatus::Exited(child.pid(), 0)
        );
    }

    #[test]
    fn test_closed_stdin_reaches_child_as_eof() {
        let child = launch(&ProcessOptions::new("cat").close_stdin()).unwrap();
        assert!(child.stdin.is_none());
        assert_eq!(read_all(&child.stdout), "");
        assert_eq!(
            waitpid(child.pid(), None).unwrap(),
            WaitStatus::Exited(child.pid(), 0)
        );
    }

    #[test]
    fn test_exec_failure_reports_and_exits_127() {
        let child = launch(&ProcessOptions::new("nonexistent_command_12345")).unwrap();

        assert_eq!(
            read_all(&child.stderr),
            format!(
                "procmux: failed to exec `nonexistent_command_12345`: errno={}\n",
                Errno::ENOENT as i32
            )
        );
        assert_eq!(
            waitpid(child.pid(), None).unwrap(),
            WaitStatus::Exited(child.pid(), EXEC_FAILURE_STATUS)
        );
    }

    #[test]
    fn test_missing_working_dir_reports_errno() {
        let child =
            launch(&ProcessOptions::new("true").working_dir("/nonexistent/procmux")).unwrap();

        let stderr = read_all(&child.stderr);
        assert!(stderr.starts_with("procmux: failed to enter working directory"));
        assert!(stderr.ends_with(&format!("errno={}\n", Errno::ENOENT as i32)));
        assert_eq!(
            waitpid(child.pid(), None).unwrap(),
            WaitStatus::Exited(child.pid(), EXEC_FAILURE_STATUS)
        );
    }

    #[test]
    fn test_decimal() {
        let mut buf = [0; 10];
        assert_eq!(decimal(0, &mut buf), b"0");
        assert_eq!(decimal(2, &mut buf), b"2");
        assert_eq!(decimal(4_294_967_295, &mut buf), b"4294967295");
    }

    #[test]
    fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let child = launch(&ProcessOptions::new("pwd").working_dir(dir.path())).unwrap();

        let printed = read_all(&child.stdout);
        assert_eq!(
            std::fs::canonicalize(printed.trim()).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        waitpid(child.pid(), None).unwrap();
    }

    #[test]
    fn test_kill_and_reap() {
        let child = launch(&ProcessOptions::new("sleep").arg("30")).unwrap();
        child.kill_and_reap();
        // Reaped already, so a second wait has nothing to collect.
        assert_eq!(waitpid(child.pid(), None), Err(Errno::ECHILD));
    }
}
