//! Execution outcomes and result normalization.
//!
//! An [`ExecutionOutcome`] is what the launcher observed. [`normalize`] turns
//! it into the [`ExecutionReport`] callers consume; it is the only place that
//! decides whether a run counts as a success.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code reported for a run stopped at the wall-clock bound.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when no container could be launched.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

/// How a container run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The program ran and exited on its own (any exit code).
    Completed,
    /// The program was killed at the timeout.
    TimedOut,
    /// No container could be run.
    LaunchFailed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::TimedOut => "timed_out",
            OutcomeStatus::LaunchFailed => "launch_failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw result of one container run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: OutcomeStatus,
    /// Wall-clock time spent in the launcher, in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    /// A program that ran to completion.
    pub fn completed(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
        duration: Duration,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            status: OutcomeStatus::Completed,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// A program stopped at the timeout `limit`.
    pub fn timed_out(limit: Duration, duration: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Execution timed out after {}s", limit.as_secs()),
            exit_code: TIMEOUT_EXIT_CODE,
            status: OutcomeStatus::TimedOut,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// A run that never started.
    pub fn launch_failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            status: OutcomeStatus::LaunchFailed,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Normalized result handed to callers.
///
/// Serializes to the engine-facing shape
/// `{stdout, stderr, exitCode, success}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    #[serde(skip)]
    pub status: OutcomeStatus,
}

/// Maps an outcome to a report. `success` holds only for a completed run
/// with exit code 0.
pub fn normalize(outcome: &ExecutionOutcome) -> ExecutionReport {
    ExecutionReport {
        stdout: outcome.stdout.clone(),
        stderr: outcome.stderr.clone(),
        exit_code: outcome.exit_code,
        success: is_success(outcome.status, outcome.exit_code),
        status: outcome.status,
    }
}

fn is_success(status: OutcomeStatus, exit_code: i32) -> bool {
    status == OutcomeStatus::Completed && exit_code == 0
}

impl From<ExecutionOutcome> for ExecutionReport {
    fn from(outcome: ExecutionOutcome) -> Self {
        let success = is_success(outcome.status, outcome.exit_code);
        Self {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: outcome.exit_code,
            success,
            status: outcome.status,
        }
    }
}
