//! CLI argument definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use procmux::process::{ProcessOptions, TrailingOutput};

/// procmux - run a program and stream its stdout live until it exits
#[derive(Parser, Debug)]
#[command(name = "procmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program, forwarding its stdout as it is produced
    Run {
        #[command(flatten)]
        options: RunArgs,

        /// Program to run, followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run `bash -c "(echo foo; sleep 1; echo bar)"` to watch live streaming
    Demo {
        #[command(flatten)]
        options: RunArgs,
    },
}

/// Options shared by every way of running a child.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Kill the child after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Working directory for the child
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Give the child a closed stdin instead of holding it open
    #[arg(long)]
    pub close_stdin: bool,

    /// Stop as soon as the child is reaped, even if stdout still holds data
    #[arg(long)]
    pub drop_trailing: bool,

    /// Maximum bytes per stdout read
    #[arg(long, value_name = "BYTES", default_value = "1000")]
    pub read_buffer: usize,

    /// Copy the child's buffered stderr to our stderr once it exits
    #[arg(long)]
    pub show_stderr: bool,

    /// Print a summary of the invocation to stderr
    #[arg(long, value_enum)]
    pub report: Option<ReportFormat>,
}

impl RunArgs {
    /// Map the flags onto invocation options for `program`.
    pub fn to_options(&self, program: &str, args: &[String]) -> ProcessOptions {
        let mut options = ProcessOptions::new(program)
            .args(args.iter().cloned())
            .read_buffer_size(self.read_buffer);

        if let Some(ms) = self.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        if let Some(ref dir) = self.cwd {
            options = options.working_dir(dir);
        }
        if self.close_stdin {
            options = options.close_stdin();
        }
        if self.drop_trailing {
            options = options.trailing_output(TrailingOutput::Drop);
        }
        options
    }
}

/// Output formats for `--report`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// One human-readable line
    Text,
    /// A JSON object
    Json,
}
