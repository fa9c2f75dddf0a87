//! coderun: sandboxed execution of untrusted code snippets.
//!
//! Runs C, Python and Java source in disposable Docker containers with a
//! wall-clock timeout and resource limits, using a private workspace
//! directory per job that is removed on every exit path.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod job;
pub mod language;
pub mod metrics;
pub mod outcome;
pub mod response;
pub mod workspace;

pub use config::{EngineConfig, RuntimeKind};
pub use engine::ExecutionEngine;
pub use error::{ConfigError, EngineError, LaunchError, WorkspaceError};
pub use job::{ExecutionRequest, Job, JobState};
pub use language::{Language, LanguageProfile, LanguageRegistry};
pub use outcome::{normalize, ExecutionOutcome, ExecutionReport, OutcomeStatus};
pub use response::EngineResponse;
