//! procmux - run a program and stream its stdout live until it exits.
//!
//! The child's stdout is forwarded byte for byte to our stdout; logs and
//! reports go to stderr.

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    procmux::logging::init_logging();
    let cli = Cli::parse();
    execute(cli).await
}
