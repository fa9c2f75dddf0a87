//! Error types for coderun operations.
//!
//! Defines error types for each subsystem:
//! - Request validation and job lifecycle
//! - Workspace provisioning and release
//! - Container launch and termination
//! - Configuration loading

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the execution engine to its caller.
///
/// Execution-level failures (timeouts, non-zero exits, launch failures) are
/// not errors; they are captured in the `ExecutionOutcome`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid job state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur while provisioning or releasing a job workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace '{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("Failed to create workspace '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove workspace '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while talking to the container runtime.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Container runtime not available: {0}")]
    RuntimeUnavailable(String),

    #[error("Image '{image}' not available: {message}")]
    ImageUnavailable { image: String, message: String },

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Error waiting for container: {0}")]
    WaitFailed(String),

    #[error("Error reading container logs: {0}")]
    LogsFailed(String),

    #[error("Failed to spawn container runtime: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to terminate container '{name}': {message}")]
    TerminateFailed { name: String, message: String },
}

/// Errors that can occur while loading the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Parse(#[from] serde_yaml::Error),
}
