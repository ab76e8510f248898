//! The process-output multiplexing core.
//!
//! An invocation spawns one child with piped stdio and streams its stdout
//! to a sink while a background thread waits for the child to exit. The
//! two meet in a single `poll` over the child's stdout and a self-pipe that
//! the waiting thread writes exactly one byte to.

mod cancel;
mod invocation;
mod launcher;
mod multiplex;
mod notifier;
mod options;
mod outcome;
mod pipe;

pub use cancel::CancelHandle;
pub use invocation::{run, run_async, run_with};
pub use launcher::{launch, Child, EXEC_FAILURE_STATUS};
pub use multiplex::{LoopExit, Multiplexer, SPURIOUS_READ_BACKOFF};
pub use notifier::TerminationNotifier;
pub use options::{ProcessOptions, TrailingOutput};
pub use outcome::{ChildStatus, Outcome, TerminationCause};
pub use pipe::{Pipe, PipeRole};
