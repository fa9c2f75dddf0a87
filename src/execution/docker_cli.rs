//! `docker` command-line backend.
//!
//! A job runs as `docker create`, then `docker start -a`, then
//! `docker inspect` for the exit status, then `docker rm -f`. Splitting
//! create from start keeps daemon failures apart from the program's own
//! exit status, which `docker run` would report through the same channel.
//!
//! Client processes are killed when the run future is dropped, but that
//! alone does not stop the container, so timeouts go through
//! [`ContainerRuntime::terminate`] which kills the container by name.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::LaunchError;
use crate::execution::resources::OutputBuffer;
use crate::execution::runtime::{ContainerInvocation, ContainerRuntime, RawOutput};

const READ_CHUNK: usize = 8 * 1024;

/// Container runtime that shells out to the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    binary: String,
}

/// Exit status and start error of a finished container.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContainerState {
    exit_code: i32,
    error: Option<String>,
}

impl DockerCliRuntime {
    /// Creates a runtime using the given docker binary (name or path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The docker binary in use.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn docker<I, S>(&self, args: I) -> Result<std::process::Output, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(LaunchError::Spawn)
    }

    /// Attaches to the created container and streams its output into
    /// capped buffers, so a chatty program cannot grow host memory.
    async fn start_and_collect(
        &self,
        invocation: &ContainerInvocation,
    ) -> Result<RawOutput, LaunchError> {
        let mut child = Command::new(&self.binary)
            .args(["start", "-a", invocation.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::LogsFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LaunchError::LogsFailed("stderr not captured".to_string()))?;

        let max_bytes = invocation.limits.max_output_bytes;
        let (stdout, stderr, status) = tokio::try_join!(
            read_capped(stdout, max_bytes),
            read_capped(stderr, max_bytes),
            child.wait(),
        )
        .map_err(|e| LaunchError::LogsFailed(e.to_string()))?;
        debug!(container = %invocation.name, status = %status, "docker start returned");

        let state = self.container_state(&invocation.name).await?;
        if let Some(error) = state.error {
            return Err(LaunchError::StartFailed(error));
        }

        Ok(RawOutput {
            stdout,
            stderr,
            exit_code: state.exit_code,
        })
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState, LaunchError> {
        let output = self
            .docker(["inspect", "--format", "{{.State.ExitCode}}|{{.State.Error}}", name])
            .await?;
        if !output.status.success() {
            return Err(LaunchError::WaitFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_state(&text).ok_or_else(|| {
            LaunchError::WaitFailed(format!("unexpected inspect output: {}", text.trim()))
        })
    }

    async fn remove(&self, name: &str) -> Result<(), LaunchError> {
        let rm = self.docker(["rm", "-f", name]).await?;
        let stderr = String::from_utf8_lossy(&rm.stderr);
        if rm.status.success() || stderr.contains("No such container") {
            Ok(())
        } else {
            Err(LaunchError::TerminateFailed {
                name: name.to_string(),
                message: stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    async fn prepare_image(&self, image: &str) -> Result<(), LaunchError> {
        let inspect = self.docker(["image", "inspect", image]).await?;
        if inspect.status.success() {
            return Ok(());
        }

        info!(image = image, "Pulling image");
        let pull = self.docker(["pull", image]).await?;
        if pull.status.success() {
            Ok(())
        } else {
            Err(LaunchError::ImageUnavailable {
                image: image.to_string(),
                message: String::from_utf8_lossy(&pull.stderr).trim().to_string(),
            })
        }
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<RawOutput, LaunchError> {
        let args = invocation.docker_create_args("never");
        debug!(container = %invocation.name, "docker {}", args.join(" "));

        let create = self.docker(&args).await?;
        if !create.status.success() {
            return Err(classify_create_failure(
                &invocation.image,
                &String::from_utf8_lossy(&create.stderr),
            ));
        }

        let result = self.start_and_collect(invocation).await;

        if let Err(e) = self.remove(&invocation.name).await {
            warn!(container = %invocation.name, error = %e, "Failed to remove container");
        }

        result
    }

    async fn terminate(&self, container_name: &str) -> Result<(), LaunchError> {
        let kill = self.docker(["kill", container_name]).await?;
        if !kill.status.success() {
            debug!(
                container = container_name,
                stderr = %String::from_utf8_lossy(&kill.stderr).trim(),
                "docker kill did not succeed"
            );
        }

        self.remove(container_name).await
    }

    async fn ping(&self) -> Result<(), LaunchError> {
        let output = self
            .docker(["version", "--format", "{{.Server.Version}}"])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LaunchError::RuntimeUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn remove_stale_containers(
        &self,
        prefix: &str,
        max_age: Duration,
    ) -> Result<usize, LaunchError> {
        let filter = format!("name={}", prefix);
        let ps = self.docker(["ps", "-a", "-q", "--filter", filter.as_str()]).await?;
        if !ps.status.success() {
            return Err(LaunchError::RuntimeUnavailable(
                String::from_utf8_lossy(&ps.stderr).trim().to_string(),
            ));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&ps.stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Name}}|{{.Created}}".to_string(),
        ];
        args.extend(ids);
        let inspect = self.docker(&args).await?;

        let now = Utc::now();
        let mut removed = 0;
        for (name, created) in String::from_utf8_lossy(&inspect.stdout)
            .lines()
            .filter_map(parse_created)
        {
            let age = (now - created).to_std().unwrap_or_default();
            if !name.starts_with(prefix) || age < max_age {
                continue;
            }
            match self.remove(&name).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container = %name, error = %e, "Failed to remove stale container"),
            }
        }

        Ok(removed)
    }
}

/// Reads a stream to the end, keeping at most `max_bytes` of it.
async fn read_capped<R>(mut reader: R, max_bytes: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = OutputBuffer::default();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.push(&chunk[..n], max_bytes);
    }
    Ok(buffer.into_string())
}

/// Parses `<exit code>|<error>` as printed by `docker inspect`.
fn parse_state(text: &str) -> Option<ContainerState> {
    let (code, error) = text.trim().split_once('|')?;
    let error = error.trim();
    Some(ContainerState {
        exit_code: code.trim().parse().ok()?,
        error: (!error.is_empty()).then(|| error.to_string()),
    })
}

/// Parses `/<name>|<RFC 3339 timestamp>` as printed by `docker inspect`.
fn parse_created(line: &str) -> Option<(String, DateTime<Utc>)> {
    let (name, created) = line.trim().split_once('|')?;
    let created = DateTime::parse_from_rfc3339(created.trim()).ok()?;
    Some((name.trim_start_matches('/').to_string(), created.with_timezone(&Utc)))
}

/// Maps the stderr of a failed `docker create` to a launch error.
fn classify_create_failure(image: &str, stderr: &str) -> LaunchError {
    let message = stderr.trim().to_string();
    if message.contains("Cannot connect to the Docker daemon") {
        LaunchError::RuntimeUnavailable(message)
    } else if message.contains("No such image")
        || message.contains("Unable to find image")
        || message.contains("pull access denied")
    {
        LaunchError::ImageUnavailable {
            image: image.to_string(),
            message,
        }
    } else {
        LaunchError::CreateFailed(message)
    }
}
