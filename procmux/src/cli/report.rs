//! Invocation summaries for `--report`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use procmux::process::{ChildStatus, Outcome, TerminationCause};

use super::args::ReportFormat;

/// What happened during one invocation.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub pid: i32,
    pub status: ChildStatus,
    pub cause: TerminationCause,
    pub bytes_forwarded: u64,
    pub stderr_bytes: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl<'a> Report<'a> {
    pub fn new(
        program: &'a str,
        args: &'a [String],
        outcome: &Outcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            program,
            args,
            pid: outcome.pid,
            status: outcome.status,
            cause: outcome.cause,
            bytes_forwarded: outcome.bytes_forwarded,
            stderr_bytes: outcome.stderr.len(),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string(self)?),
            ReportFormat::Text => Ok(format!(
                "{} (pid {}) {}, {}: {} bytes forwarded in {} ms",
                self.program,
                self.pid,
                self.status,
                self.cause,
                self.bytes_forwarded,
                self.duration_ms
            )),
        }
    }
}
