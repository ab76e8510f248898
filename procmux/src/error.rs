//! Error types for the multiplexing core.

use std::io;

use thiserror::Error;

use crate::process::PipeRole;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of an invocation.
///
/// Pipe, fork and thread-start failures mean the host ran out of some OS
/// resource. They are never retried; callers decide whether that is fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to create {role} pipe: {source}")]
    Pipe {
        role: PipeRole,
        #[source]
        source: nix::Error,
    },

    #[error("failed to fork child for `{program}`: {source}")]
    Fork {
        program: String,
        #[source]
        source: nix::Error,
    },

    #[error("failed to start termination notifier: {0}")]
    NotifierStart(#[source] io::Error),

    #[error("failed to signal termination of child {pid}: {source}")]
    SignalWrite {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for child {pid}: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("termination notifier panicked")]
    NotifierPanicked,

    #[error("failed to poll child descriptors: {0}")]
    Poll(#[source] nix::Error),

    #[error("failed to forward child output: {0}")]
    Forward(#[source] io::Error),

    #[error("invocation task failed: {0}")]
    Join(String),
}

impl Error {
    /// Whether this is one of the setup failures caused by OS resource
    /// exhaustion (pipes, processes, threads).
    pub const fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::Pipe { .. } | Self::Fork { .. } | Self::NotifierStart(_)
        )
    }
}
