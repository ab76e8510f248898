//! A single invocation: setup, event loop, teardown.
//!
//! Every descriptor involved is an owned value, so each is closed exactly
//! once whichever way the invocation ends. The termination write end leaves
//! with the notifier thread; everything else is dropped here after the
//! notifier has been joined and the child reaped.

use std::io::{self, Write};
use std::os::fd::AsFd;

use tokio::task::JoinError;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::cancel::CancelHandle;
use super::launcher;
use super::multiplex::{collect_buffered, ready_now, LoopExit, Multiplexer};
use super::notifier::TerminationNotifier;
use super::options::ProcessOptions;
use super::outcome::{Outcome, TerminationCause};
use super::pipe::{Pipe, PipeRole};
use crate::error::{Error, Result};

/// Run the child and stream its stdout to this process's stdout.
///
/// # Example
///
/// ```rust,no_run
/// use procmux::process::{run, ProcessOptions};
///
/// fn main() -> procmux::Result<()> {
///     let outcome = run(
///         &ProcessOptions::new("bash")
///             .arg("-c")
///             .arg("echo foo; sleep 1; echo bar"),
///     )?;
///
///     eprintln!("exit code: {:?}", outcome.code());
///     Ok(())
/// }
/// ```
pub fn run(options: &ProcessOptions) -> Result<Outcome> {
    run_with(options, io::stdout().lock(), None)
}

/// Run the child, streaming its stdout into `sink`.
///
/// Each chunk is written and flushed as soon as it is read. Returns only
/// after the child has been reaped. With `cancel`, firing the handle kills
/// the child and ends the invocation with [`TerminationCause::Cancelled`].
pub fn run_with<W: Write>(
    options: &ProcessOptions,
    sink: W,
    cancel: Option<&CancelHandle>,
) -> Result<Outcome> {
    let id = Uuid::now_v7();
    let span = info_span!("invocation", %id, program = %options.program);
    let _entered = span.enter();

    let (terminate_read, terminate_write) = Pipe::new(PipeRole::Terminate)?.into_files();
    let child = launcher::launch(options)?;
    let pid = child.pid();

    let mut mux = Multiplexer::new(
        terminate_read.as_fd(),
        &child.stdout,
        sink,
        options.trailing_output,
        options.read_buffer_size,
    );
    if let Some(cancel) = cancel {
        mux = mux.with_cancel(cancel.as_fd());
    }

    let notifier = match TerminationNotifier::start(pid, terminate_write) {
        Ok(notifier) => notifier,
        Err(err) => {
            child.kill_and_reap();
            return Err(err);
        }
    };

    let exit = mux.run();
    let (_, forwarded, sink_error) = mux.into_parts();

    // Cancellation and poll failures leave a child that may run forever;
    // kill it unless the notifier has already reported it gone. The
    // notifier never reaps, so the pid still names our child or its zombie.
    let abandoned = !matches!(exit, Ok(LoopExit::Terminated | LoopExit::StdoutClosed));
    if abandoned && !ready_now(terminate_read.as_fd()) {
        debug!(pid = pid.as_raw(), "killing child");
        child.kill();
    }

    let status = notifier.join();
    if status.is_ok() {
        child.reap();
    }
    let stderr = collect_buffered(&child.stderr, options.stderr_limit);
    drop(child);
    drop(terminate_read);

    let exit = exit?;
    let status = status?;
    if let Some(err) = sink_error {
        return Err(Error::Forward(err));
    }

    let cause = match exit {
        LoopExit::Terminated => TerminationCause::ChildExited,
        LoopExit::StdoutClosed => TerminationCause::StdoutClosed,
        LoopExit::Cancelled => TerminationCause::Cancelled,
    };
    info!(?status, ?cause, bytes = forwarded, "invocation finished");

    Ok(Outcome {
        pid: pid.as_raw(),
        status,
        cause,
        bytes_forwarded: forwarded,
        stderr,
    })
}

/// Run the child on tokio's blocking pool, streaming to stdout.
///
/// `options.timeout` is enforced by a timer that fires a cancel handle, so
/// the deadline is just another event source of the same loop. An expired
/// deadline yields [`TerminationCause::TimedOut`].
pub async fn run_async(options: ProcessOptions) -> Result<Outcome> {
    let cancel = CancelHandle::new()?;
    let deadline = options.timeout;

    let task_cancel = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        run_with(&options, io::stdout(), Some(&task_cancel))
    });

    let Some(limit) = deadline else {
        return flatten(task.await);
    };

    tokio::select! {
        joined = &mut task => flatten(joined),
        () = tokio::time::sleep(limit) => {
            debug!(?limit, "deadline passed, cancelling");
            if let Err(err) = cancel.cancel() {
                warn!(%err, "failed to fire cancellation");
            }
            let mut outcome = flatten(task.await)?;
            if outcome.cause == TerminationCause::Cancelled {
                outcome.cause = TerminationCause::TimedOut;
            }
            Ok(outcome)
        }
    }
}

fn flatten(joined: std::result::Result<Result<Outcome>, JoinError>) -> Result<Outcome> {
    joined.map_err(|err| Error::Join(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::launcher::EXEC_FAILURE_STATUS;
    use crate::process::multiplex::SPURIOUS_READ_BACKOFF;
    use crate::process::{ChildStatus, TrailingOutput};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Sink that timestamps every chunk it receives.
    struct Recorder(mpsc::Sender<(Instant, Vec<u8>)>);

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let _ = self.0.send((Instant::now(), buf.to_vec()));
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(options: &ProcessOptions) -> (Outcome, Vec<u8>) {
        let mut sink = Vec::new();
        let outcome = run_with(options, &mut sink, None).unwrap();
        (outcome, sink)
    }

    #[test]
    fn test_forwards_stdout() {
        let (outcome, out) = capture(&ProcessOptions::new("echo").arg("hello world"));

        assert!(outcome.success());
        assert_eq!(outcome.cause, TerminationCause::ChildExited);
        assert_eq!(out, b"hello world\n");
        assert_eq!(outcome.bytes_forwarded, 12);
    }

    #[test]
    fn test_silent_child() {
        let start = Instant::now();
        let (outcome, out) = capture(&ProcessOptions::new("true"));

        assert!(outcome.success());
        assert!(out.is_empty());
        assert_eq!(outcome.bytes_forwarded, 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_exit_is_noticed_without_backoff() {
        // The child's stdout hangs up just before it is waited for; that
        // must not cost a back-off pause on every run.
        let slow = (0..10)
            .filter(|_| {
                let start = Instant::now();
                let (outcome, _) = capture(&ProcessOptions::new("true"));
                assert!(outcome.success());
                start.elapsed() >= SPURIOUS_READ_BACKOFF
            })
            .count();
        assert!(slow < 3, "{slow} of 10 runs took a back-off pause");
    }

    #[test]
    fn test_exit_code() {
        let (outcome, _) = capture(&ProcessOptions::new("sh").arg("-c").arg("exit 42"));

        assert!(!outcome.success());
        assert_eq!(outcome.code(), Some(42));
    }

    #[test]
    fn test_stderr_is_captured_not_forwarded() {
        let (outcome, out) = capture(
            &ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo visible; echo hidden >&2"),
        );

        assert_eq!(out, b"visible\n");
        assert_eq!(outcome.stderr_string(), "hidden\n");
    }

    #[test]
    fn test_nonexistent_program_completes() {
        let (outcome, out) = capture(&ProcessOptions::new("nonexistent_command_12345"));

        assert!(out.is_empty());
        assert_eq!(
            outcome.status,
            ChildStatus::Exited {
                code: EXEC_FAILURE_STATUS
            }
        );
        assert!(outcome
            .stderr_string()
            .contains("failed to exec `nonexistent_command_12345`"));
    }

    #[test]
    fn test_large_output_is_complete() {
        let (outcome, out) = capture(
            &ProcessOptions::new("head")
                .arg("-c")
                .arg("1000000")
                .arg("/dev/zero"),
        );

        assert!(outcome.success());
        assert_eq!(out.len(), 1_000_000);
        assert_eq!(outcome.bytes_forwarded, 1_000_000);
    }

    #[test]
    fn test_output_right_before_exit_is_kept() {
        for i in 0..50 {
            let (outcome, out) =
                capture(&ProcessOptions::new("printf").arg(format!("line-{i}")));
            assert!(outcome.success());
            assert_eq!(out, format!("line-{i}").as_bytes());
        }
    }

    #[test]
    fn test_drop_policy_still_terminates() {
        let start = Instant::now();
        let (outcome, out) = capture(
            &ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo early; sleep 0.2; echo late")
                .trailing_output(TrailingOutput::Drop),
        );

        assert!(outcome.success());
        // The first line is read long before the child exits; the last one
        // may or may not make it.
        assert!(out.starts_with(b"early\n"));
        assert!(out == b"early\n" || out == b"early\nlate\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_streams_live() {
        let (tx, rx) = mpsc::channel();
        let options = ProcessOptions::new("bash")
            .arg("-c")
            .arg("(echo foo; sleep 1; echo bar)");

        let outcome = run_with(&options, Recorder(tx), None).unwrap();
        assert!(outcome.success());

        let chunks: Vec<_> = rx.try_iter().collect();
        let all: Vec<u8> = chunks.iter().flat_map(|(_, bytes)| bytes.clone()).collect();
        assert_eq!(all, b"foo\nbar\n");

        let (first_at, first) = &chunks[0];
        let (last_at, _) = chunks.last().unwrap();
        assert_eq!(first, b"foo\n");
        assert!(*last_at - *first_at >= Duration::from_millis(800));
    }

    #[test]
    fn test_cancel_kills_child() {
        let cancel = CancelHandle::new().unwrap();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel().unwrap();
        });

        let start = Instant::now();
        let outcome = run_with(
            &ProcessOptions::new("sleep").arg("30"),
            io::sink(),
            Some(&cancel),
        )
        .unwrap();

        assert_eq!(outcome.cause, TerminationCause::Cancelled);
        assert_eq!(outcome.status, ChildStatus::Signaled { signal: 9 });
        assert!(!outcome.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_close_stdin_lets_reader_finish() {
        let (outcome, out) = capture(&ProcessOptions::new("cat").close_stdin());
        assert!(outcome.success());
        assert!(out.is_empty());
    }

    #[test]
    fn test_broken_sink_is_reported_after_reaping() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let result = run_with(
            &ProcessOptions::new("head")
                .arg("-c")
                .arg("500000")
                .arg("/dev/zero"),
            Broken,
            None,
        );
        assert!(matches!(result, Err(Error::Forward(_))));
    }

    #[test]
    fn test_invalid_command_creates_nothing() {
        let result = run_with(&ProcessOptions::new(""), io::sink(), None);
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_run_async_without_timeout() {
        let outcome = run_async(ProcessOptions::new("true")).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.cause, TerminationCause::ChildExited);
    }

    #[tokio::test]
    async fn test_run_async_timeout() {
        let start = Instant::now();
        let outcome = run_async(
            ProcessOptions::new("sleep")
                .arg("30")
                .timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap();

        assert_eq!(outcome.cause, TerminationCause::TimedOut);
        assert!(!outcome.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
