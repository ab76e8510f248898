//! CLI argument parsing module.

mod args;
mod commands;
mod report;

pub use args::Cli;
pub use commands::execute;
