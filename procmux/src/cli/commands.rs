//! CLI command execution.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;

use procmux::process::{run_async, Outcome};

use super::args::{Cli, Commands, RunArgs};
use super::report::Report;

/// Shell snippet run by `procmux demo`: two lines a second apart.
const DEMO_SCRIPT: &str = "(echo foo; sleep 1; echo bar)";

/// Execute the parsed command line and return the exit code to use.
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run { options, command } => {
            let (program, args) = command
                .split_first()
                .context("A program to run is required")?;
            run_command(program, args, &options).await.map(ExitCode::from)
        }
        Commands::Demo { options } => {
            let args = ["-c".to_string(), DEMO_SCRIPT.to_string()];
            run_command("bash", &args, &options).await.map(ExitCode::from)
        }
    }
}

async fn run_command(program: &str, args: &[String], run_args: &RunArgs) -> Result<u8> {
    let options = run_args.to_options(program, args);

    let started_at = Utc::now();
    let outcome = run_async(options)
        .await
        .with_context(|| format!("Failed to run {program}"))?;
    let finished_at = Utc::now();

    if run_args.show_stderr && !outcome.stderr.is_empty() {
        io::stderr()
            .write_all(&outcome.stderr)
            .context("Failed to copy child stderr")?;
    }

    if let Some(format) = run_args.report {
        let report = Report::new(program, args, &outcome, started_at, finished_at);
        eprintln!("{}", report.render(format)?);
    }

    Ok(exit_code(&outcome))
}

/// Mirror the child's status the way a shell would.
fn exit_code(outcome: &Outcome) -> u8 {
    u8::try_from(outcome.status.shell_code()).unwrap_or(1)
}
