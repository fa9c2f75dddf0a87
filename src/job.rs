//! Job definitions for the execution engine.
//!
//! - `ExecutionRequest`: the `(code, input, lang)` triple a caller submits
//! - `Job`: one in-flight execution with its lifecycle state
//! - `JobState`: the per-job state machine

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::error::EngineError;
use crate::outcome::OutcomeStatus;

fn default_lang() -> String {
    "c".to_string()
}

/// Engine-facing request: `{code, input, lang}`.
///
/// `code` and `input` may be empty; `lang` defaults to `"c"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub input: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl ExecutionRequest {
    /// Creates a request with empty stdin.
    pub fn new(lang: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input: String::new(),
            lang: lang.into(),
        }
    }

    /// Sets the stdin text.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }
}

/// Lifecycle of one job.
///
/// ```text
/// Validating ─┬─> Rejected
///             ├─> Provisioned ─> Running ─┬─> Completed ──┐
///             │        │                  ├─> TimedOut ───┤
///             │        └──────────────────┴─> LaunchFailed┴─> Released
///             └─> LaunchFailed (workspace could not be written)
/// ```
///
/// `Released` is reachable from every state except `Rejected`; both are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Validating,
    Rejected,
    Provisioned,
    Running,
    Completed,
    TimedOut,
    LaunchFailed,
    Released,
}

impl JobState {
    /// States this state may move to.
    pub fn valid_targets(&self) -> &'static [JobState] {
        use JobState::*;
        match self {
            Validating => &[Rejected, Provisioned, LaunchFailed, Released],
            Provisioned => &[Running, LaunchFailed, Released],
            Running => &[Completed, TimedOut, LaunchFailed, Released],
            Completed | TimedOut | LaunchFailed => &[Released],
            Rejected | Released => &[],
        }
    }

    /// Whether `self -> to` is allowed.
    pub fn can_transition(&self, to: JobState) -> bool {
        self.valid_targets().contains(&to)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        self.valid_targets().is_empty()
    }
}

impl From<OutcomeStatus> for JobState {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Completed => JobState::Completed,
            OutcomeStatus::TimedOut => JobState::TimedOut,
            OutcomeStatus::LaunchFailed => JobState::LaunchFailed,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Validating => "validating",
            JobState::Rejected => "rejected",
            JobState::Provisioned => "provisioned",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::TimedOut => "timed_out",
            JobState::LaunchFailed => "launch_failed",
            JobState::Released => "released",
        };
        f.write_str(s)
    }
}

/// One execution request in flight.
///
/// The id only names the workspace directory and container; it is dropped
/// with the job when the call returns.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub lang: String,
    pub source_code: String,
    pub stdin_data: String,
    pub workspace_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    state: JobState,
}

impl Job {
    /// Creates a job in the `Validating` state with a fresh random id.
    pub fn new(request: &ExecutionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            lang: request.lang.clone(),
            source_code: request.code.clone(),
            stdin_data: request.input.clone(),
            workspace_path: None,
            started_at: Utc::now(),
            state: JobState::Validating,
        }
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Moves the job to `to`, rejecting transitions the state machine does
    /// not allow.
    pub fn transition(&mut self, to: JobState) -> Result<(), EngineError> {
        if !self.state.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        trace!(job_id = %self.id, from = %self.state, to = %to, "Job state transition");
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(&ExecutionRequest::new("python", "print('hi')"))
    }

    #[test]
    fn test_request_defaults() {
        let req: ExecutionRequest = serde_json::from_str(r#"{"code": "int main(){}"}"#).unwrap();
        assert_eq!(req.lang, "c");
        assert_eq!(req.input, "");
    }

    #[test]
    fn test_new_job() {
        let a = job();
        let b = job();
        assert_eq!(a.state(), JobState::Validating);
        assert_ne!(a.id, b.id);
        assert!(a.workspace_path.is_none());
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        for state in [
            JobState::Provisioned,
            JobState::Running,
            JobState::Completed,
            JobState::Released,
        ] {
            job.transition(state).unwrap();
        }
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_rejected_only_from_validating() {
        let mut job = job();
        job.transition(JobState::Rejected).unwrap();
        assert!(job.state().is_terminal());
        assert!(job.transition(JobState::Released).is_err());

        assert!(!JobState::Provisioned.can_transition(JobState::Rejected));
        assert!(!JobState::Running.can_transition(JobState::Rejected));
    }

    #[test]
    fn test_released_reachable_from_non_rejected_states() {
        for state in [
            JobState::Validating,
            JobState::Provisioned,
            JobState::Running,
            JobState::Completed,
            JobState::TimedOut,
            JobState::LaunchFailed,
        ] {
            assert!(state.can_transition(JobState::Released), "{}", state);
        }
        assert!(!JobState::Rejected.can_transition(JobState::Released));
    }

    #[test]
    fn test_invalid_transition_error() {
        let mut job = job();
        let err = job.transition(JobState::Completed).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { ref from, ref to }
            if from == "validating" && to == "completed"));
        assert_eq!(job.state(), JobState::Validating);
    }

    #[test]
    fn test_from_outcome_status() {
        assert_eq!(JobState::from(OutcomeStatus::TimedOut), JobState::TimedOut);
        assert_eq!(JobState::from(OutcomeStatus::LaunchFailed), JobState::LaunchFailed);
    }
}
