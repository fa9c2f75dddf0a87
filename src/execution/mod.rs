//! Container execution layer.
//!
//! This module turns a provisioned workspace into exactly one container run,
//! bounded by a wall-clock timeout and the configured resource limits.
//!
//! # Architecture
//!
//! ```text
//! Workspace + LanguageProfile → ExecutionLauncher → ContainerRuntime → ExecutionOutcome
//!                                     │                  ├── DockerApiRuntime (bollard)
//!                                     │                  └── DockerCliRuntime (docker binary)
//!                                     └── timeout → terminate(container)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use coderun::execution::{DockerApiRuntime, ExecutionLauncher};
//!
//! let runtime = Arc::new(DockerApiRuntime::connect()?);
//! let launcher = ExecutionLauncher::new(runtime);
//! let outcome = launcher.launch(&workspace, &profile).await;
//! ```

use std::sync::Arc;

pub mod docker_cli;
pub mod docker_client;
pub mod launcher;
pub mod resources;
pub mod runtime;

pub use docker_cli::DockerCliRuntime;
pub use docker_client::DockerApiRuntime;
pub use launcher::{ExecutionLauncher, CONTAINER_PREFIX};
pub use resources::ExecutionLimits;
pub use runtime::{ContainerInvocation, ContainerRuntime, RawOutput};

use crate::config::{EngineConfig, RuntimeKind};
use crate::error::LaunchError;

/// Builds the runtime selected in the configuration.
pub fn runtime_from_config(config: &EngineConfig) -> Result<Arc<dyn ContainerRuntime>, LaunchError> {
    match config.runtime {
        RuntimeKind::Api => Ok(Arc::new(DockerApiRuntime::connect()?)),
        RuntimeKind::Cli => Ok(Arc::new(DockerCliRuntime::new(config.docker_binary.clone()))),
    }
}
