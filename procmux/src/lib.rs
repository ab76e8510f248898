//! procmux - stream a child's stdout live while waiting for it to exit.
//!
//! The library half holds the multiplexing core in [`process`]; the binary
//! wraps it in a small CLI.

pub mod error;
pub mod logging;
pub mod process;

pub use error::{Error, Result};
