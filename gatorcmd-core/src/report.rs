use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::runner::CommandRunner;

/// Record of a completed command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub command: Vec<String>,
    pub exit_code: i32,
    pub output: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Snapshot a finished runner. Fails with `NotFinished` while the run is
    /// still in flight.
    pub fn from_runner(runner: &CommandRunner) -> Result<Self> {
        let exit_code = runner.exit_code()?;
        let started_at = runner.started_at();
        let completed_at = runner.completed_at();
        let duration_ms = match (started_at, completed_at) {
            (Some(started), Some(completed)) => completed
                .signed_duration_since(started)
                .num_milliseconds()
                .max(0) as u64,
            _ => 0,
        };

        Ok(Self {
            command: runner.command().to_vec(),
            exit_code,
            output: runner.output(),
            started_at,
            completed_at,
            duration_ms,
        })
    }
}
