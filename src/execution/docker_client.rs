//! Docker Engine API backend using the bollard crate.
//!
//! Each job container is created without auto-remove so its logs can be
//! read after it exits; the runtime removes it explicitly afterwards.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::LaunchError;
use crate::execution::resources::OutputBuffer;
use crate::execution::runtime::{ContainerInvocation, ContainerRuntime, RawOutput};

/// Container runtime backed by the Docker Engine API.
pub struct DockerApiRuntime {
    docker: Docker,
}

impl DockerApiRuntime {
    /// Connects to the local Docker daemon (socket or `DOCKER_HOST`).
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::RuntimeUnavailable` if the client cannot be set up.
    pub fn connect() -> Result<Self, LaunchError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| LaunchError::RuntimeUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a runtime from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_config(invocation: &ContainerInvocation) -> Config<String> {
        let limits = &invocation.limits;
        let host_config = HostConfig {
            binds: Some(vec![invocation.bind()]),
            memory: Some(limits.memory_bytes()),
            memory_swap: Some(limits.memory_bytes()),
            cpu_period: Some(limits.cpu_period()),
            cpu_quota: Some(limits.cpu_quota()),
            pids_limit: Some(limits.max_processes as i64),
            network_mode: Some(limits.network_mode.clone()),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            auto_remove: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(invocation.image.clone()),
            cmd: Some(invocation.command.clone()),
            working_dir: Some(invocation.working_dir.clone()),
            network_disabled: Some(limits.network_mode == "none"),
            host_config: Some(host_config),
            tty: Some(false),
            open_stdin: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }

    async fn create(&self, invocation: &ContainerInvocation) -> Result<(), LaunchError> {
        let options = CreateContainerOptions {
            name: invocation.name.clone(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), Self::container_config(invocation))
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => LaunchError::ImageUnavailable {
                    image: invocation.image.clone(),
                    message,
                },
                BollardError::DockerResponseServerError { message, .. } => {
                    LaunchError::CreateFailed(message)
                }
                other => LaunchError::RuntimeUnavailable(other.to_string()),
            })?;

        Ok(())
    }

    async fn start_and_collect(
        &self,
        invocation: &ContainerInvocation,
    ) -> Result<RawOutput, LaunchError> {
        self.docker
            .start_container(&invocation.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| LaunchError::StartFailed(e.to_string()))?;

        let exit_code = self.wait(&invocation.name).await?;
        let max_bytes = invocation.limits.max_output_bytes;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(&invocation.name, Some(options));
        let mut stdout = OutputBuffer::default();
        let mut stderr = OutputBuffer::default();

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message, max_bytes),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message, max_bytes),
                Ok(_) => {}
                Err(e) => return Err(LaunchError::LogsFailed(e.to_string())),
            }
        }

        Ok(RawOutput {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code: i32::try_from(exit_code).unwrap_or(-1),
        })
    }

    /// Waits for the container to stop and returns its exit code.
    async fn wait(&self, name: &str) -> Result<i64, LaunchError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(name, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(LaunchError::WaitFailed(e.to_string())),
            None => Err(LaunchError::WaitFailed(
                "wait stream ended without a status".to_string(),
            )),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), BollardError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerApiRuntime {
    fn name(&self) -> &'static str {
        "docker-api"
    }

    async fn prepare_image(&self, image: &str) -> Result<(), LaunchError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image = image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| LaunchError::ImageUnavailable {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<RawOutput, LaunchError> {
        self.create(invocation).await?;
        debug!(container = %invocation.name, image = %invocation.image, "Container created");

        let result = self.start_and_collect(invocation).await;

        if let Err(e) = self.remove(&invocation.name).await {
            warn!(container = %invocation.name, error = %e, "Failed to remove container");
        }

        result
    }

    async fn terminate(&self, container_name: &str) -> Result<(), LaunchError> {
        let kill = self
            .docker
            .kill_container(
                container_name,
                Some(KillContainerOptions { signal: "SIGKILL" }),
            )
            .await;

        match kill {
            Ok(()) => {}
            // gone already, or not running any more
            Err(e) if is_not_found(&e) || is_conflict(&e) => {}
            Err(e) => {
                return Err(LaunchError::TerminateFailed {
                    name: container_name.to_string(),
                    message: e.to_string(),
                })
            }
        }

        self.remove(container_name)
            .await
            .map_err(|e| LaunchError::TerminateFailed {
                name: container_name.to_string(),
                message: e.to_string(),
            })
    }

    async fn ping(&self) -> Result<(), LaunchError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| LaunchError::RuntimeUnavailable(e.to_string()))
    }

    async fn remove_stale_containers(
        &self,
        prefix: &str,
        max_age: Duration,
    ) -> Result<usize, LaunchError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| LaunchError::RuntimeUnavailable(e.to_string()))?;

        let mut removed = 0;
        for name in stale_names(&summaries, prefix, max_age, chrono::Utc::now().timestamp()) {
            match self.remove(&name).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container = %name, error = %e, "Failed to remove stale container"),
            }
        }

        Ok(removed)
    }
}

/// Names of listed containers matching `prefix` created at least `max_age`
/// before `now` (Unix seconds).
fn stale_names(
    summaries: &[ContainerSummary],
    prefix: &str,
    max_age: Duration,
    now: i64,
) -> Vec<String> {
    summaries
        .iter()
        .filter(|c| {
            c.created
                .is_some_and(|created| now.saturating_sub(created) >= max_age.as_secs() as i64)
        })
        .filter_map(|c| {
            c.names
                .as_ref()?
                .iter()
                .map(|n| n.trim_start_matches('/'))
                .find(|n| n.starts_with(prefix))
                .map(str::to_string)
        })
        .collect()
}

fn is_not_found(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_conflict(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError {
            status_code: 409,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::resources::ExecutionLimits;
    use std::path::PathBuf;

    fn invocation(network_mode: &str) -> ContainerInvocation {
        let mut limits = ExecutionLimits::new(256, 0.5, 32);
        limits.network_mode = network_mode.to_string();
        ContainerInvocation {
            name: "coderun-1".to_string(),
            image: "gcc:13".to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), "./main".to_string()],
            host_dir: PathBuf::from("/srv/code/1"),
            mount_point: "/usr/src/app/1".to_string(),
            working_dir: "/usr/src/app/1".to_string(),
            limits,
        }
    }

    fn summary(name: &str, created: i64) -> ContainerSummary {
        ContainerSummary {
            names: Some(vec![format!("/{}", name)]),
            created: Some(created),
            ..Default::default()
        }
    }

    #[test]
    fn test_stale_names_by_prefix_and_age() {
        let now = 1_000_000;
        let summaries = vec![
            summary("coderun-old", now - 3600),
            summary("coderun-new", now - 5),
            summary("postgres", now - 86_400),
            ContainerSummary::default(),
        ];

        let names = stale_names(&summaries, "coderun-", Duration::from_secs(600), now);
        assert_eq!(names, vec!["coderun-old".to_string()]);
    }

    #[test]
    fn test_container_config() {
        let config = DockerApiRuntime::container_config(&invocation("none"));

        assert_eq!(config.image.as_deref(), Some("gcc:13"));
        assert_eq!(config.working_dir.as_deref(), Some("/usr/src/app/1"));
        assert_eq!(config.cmd.as_ref().unwrap().len(), 3);
        assert_eq!(config.tty, Some(false));
        assert_eq!(config.network_disabled, Some(true));

        let host = config.host_config.unwrap();
        assert_eq!(host.binds.unwrap(), vec!["/srv/code/1:/usr/src/app/1:rw"]);
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.cpu_quota, Some(50_000));
        assert_eq!(host.pids_limit, Some(32));
        assert_eq!(host.auto_remove, Some(false));
    }

    #[test]
    fn test_container_config_bridge_network() {
        let config = DockerApiRuntime::container_config(&invocation("bridge"));
        assert_eq!(config.network_disabled, Some(false));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("bridge")
        );
    }

    #[test]
    fn test_error_classification() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "is not running".to_string(),
        };
        assert!(is_not_found(&not_found));
        assert!(!is_not_found(&conflict));
        assert!(is_conflict(&conflict));
    }
}
