//! Container runtime abstraction.
//!
//! The launcher talks to the container engine only through
//! [`ContainerRuntime`]. Two backends ship with the crate: the Docker Engine
//! API ([`DockerApiRuntime`](super::DockerApiRuntime)) and the `docker`
//! command-line binary ([`DockerCliRuntime`](super::DockerCliRuntime)).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LaunchError;
use crate::execution::resources::ExecutionLimits;

/// Everything needed to run one job container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInvocation {
    /// Container name, unique per job.
    pub name: String,
    /// Image holding the language toolchain.
    pub image: String,
    /// Command executed in the container.
    pub command: Vec<String>,
    /// Absolute host path of the job workspace.
    pub host_dir: PathBuf,
    /// Where the workspace is mounted inside the container.
    pub mount_point: String,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Resource limits for the container.
    pub limits: ExecutionLimits,
}

impl ContainerInvocation {
    /// The read/write bind mount in `host:container:rw` format.
    pub fn bind(&self) -> String {
        format!("{}:{}:rw", self.host_dir.display(), self.mount_point)
    }

    /// Arguments for `docker create`, without the binary name.
    ///
    /// `pull` is the value of the `--pull` flag (`never`, `missing`).
    pub fn docker_create_args(&self, pull: &str) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            self.name.clone(),
            format!("--pull={}", pull),
        ];

        args.extend(self.limits.docker_run_flags());
        args.extend([
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "-v".to_string(),
            self.bind(),
            "-w".to_string(),
            self.working_dir.clone(),
            self.image.clone(),
        ]);
        args.extend(self.command.iter().cloned());

        args
    }
}

/// Captured result of a container that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A container engine able to run one job container at a time per call.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Makes sure the image is present locally, pulling it if needed.
    async fn prepare_image(&self, _image: &str) -> Result<(), LaunchError> {
        Ok(())
    }

    /// Runs the container to completion and captures its output.
    ///
    /// The container must not outlive a completed call. If the returned
    /// future is dropped early, the caller is responsible for invoking
    /// [`ContainerRuntime::terminate`].
    async fn run(&self, invocation: &ContainerInvocation) -> Result<RawOutput, LaunchError>;

    /// Kills and removes the named container. A container that no longer
    /// exists is not an error.
    async fn terminate(&self, container_name: &str) -> Result<(), LaunchError>;

    /// Checks that the runtime is reachable.
    async fn ping(&self) -> Result<(), LaunchError>;

    /// Force-removes containers whose name starts with `prefix` and that
    /// were created more than `max_age` ago. Returns how many were removed.
    async fn remove_stale_containers(
        &self,
        _prefix: &str,
        _max_age: Duration,
    ) -> Result<usize, LaunchError> {
        Ok(0)
    }
}
