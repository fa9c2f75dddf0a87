//! Boundary response shape.
//!
//! Callers exposing the engine over some transport get either the report
//! `{stdout, stderr, exitCode, success}` or `{error}` for a rejected
//! request, together with the status code the transport should use.

use serde::Serialize;

use crate::error::EngineError;
use crate::outcome::{ExecutionReport, OutcomeStatus};

/// Engine result in boundary form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EngineResponse {
    Report(ExecutionReport),
    Error {
        error: String,
        #[serde(skip)]
        status: u16,
    },
}

impl EngineResponse {
    /// HTTP-style status code for this response.
    ///
    /// | case                 | code |
    /// |----------------------|------|
    /// | success              | 200  |
    /// | non-zero exit        | 400  |
    /// | timeout              | 408  |
    /// | launch failure       | 500  |
    /// | unsupported language | 400  |
    /// | engine fault         | 500  |
    pub fn status_code(&self) -> u16 {
        match self {
            EngineResponse::Report(report) => match report.status {
                _ if report.success => 200,
                OutcomeStatus::Completed => 400,
                OutcomeStatus::TimedOut => 408,
                OutcomeStatus::LaunchFailed => 500,
            },
            EngineResponse::Error { status, .. } => *status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EngineResponse::Report(report) if report.success)
    }
}

impl From<Result<ExecutionReport, EngineError>> for EngineResponse {
    fn from(result: Result<ExecutionReport, EngineError>) -> Self {
        match result {
            Ok(report) => EngineResponse::Report(report),
            Err(e) => EngineResponse::Error {
                status: match e {
                    EngineError::UnsupportedLanguage(_) => 400,
                    EngineError::InvalidTransition { .. } | EngineError::Config(_) => 500,
                },
                error: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::outcome::{normalize, ExecutionOutcome};
    use std::time::Duration;

    fn report(outcome: ExecutionOutcome) -> EngineResponse {
        EngineResponse::from(Ok::<_, EngineError>(normalize(&outcome)))
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(report(ExecutionOutcome::completed("hi", "", 0, Duration::ZERO)).status_code(), 200);
        assert_eq!(report(ExecutionOutcome::completed("", "boom", 2, Duration::ZERO)).status_code(), 400);
        assert_eq!(
            report(ExecutionOutcome::timed_out(Duration::from_secs(10), Duration::from_secs(10))).status_code(),
            408
        );
        assert_eq!(report(ExecutionOutcome::launch_failed("no daemon", Duration::ZERO)).status_code(), 500);
    }

    #[test]
    fn test_unsupported_language_shape() {
        let response =
            EngineResponse::from(Err(EngineError::UnsupportedLanguage("go".to_string())));
        assert_eq!(response.status_code(), 400);
        assert!(!response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"error": "unsupported language: go"})
        );
    }

    #[test]
    fn test_engine_faults_are_server_errors() {
        let transition = EngineResponse::from(Err::<ExecutionReport, _>(
            EngineError::InvalidTransition {
                from: "released".to_string(),
                to: "running".to_string(),
            },
        ));
        assert_eq!(transition.status_code(), 500);
        let value = serde_json::to_value(&transition).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 1);
        assert!(value["error"].as_str().unwrap().contains("released"));

        let config = EngineResponse::from(Err::<ExecutionReport, _>(EngineError::Config(
            ConfigError::InvalidValue {
                key: "timeout_secs".to_string(),
                message: "must be positive".to_string(),
            },
        )));
        assert_eq!(config.status_code(), 500);
        assert!(!config.is_success());
    }

    #[test]
    fn test_report_shape_is_flat() {
        let response = report(ExecutionOutcome::completed("hi\n", "", 0, Duration::ZERO));
        assert!(response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"stdout": "hi\n", "stderr": "", "exitCode": 0, "success": true})
        );
    }
}
