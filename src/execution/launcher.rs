//! Execution launcher: one bounded container run per job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::execution::resources::ExecutionLimits;
use crate::execution::runtime::{ContainerInvocation, ContainerRuntime};
use crate::language::LanguageProfile;
use crate::outcome::ExecutionOutcome;
use crate::workspace::Workspace;

/// Prefix of every job container name.
pub const CONTAINER_PREFIX: &str = "coderun-";

/// Delay before a timed out container is terminated a second time.
pub const REAP_DELAY: Duration = Duration::from_secs(5);

/// Runs a job's container under a wall-clock timeout.
#[derive(Clone)]
pub struct ExecutionLauncher {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
    limits: ExecutionLimits,
    container_root: String,
    auto_pull: bool,
    reap_delay: Duration,
}

impl ExecutionLauncher {
    /// Creates a launcher with the given runtime and default settings.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::from_config(runtime, &EngineConfig::default())
    }

    /// Creates a launcher from the engine configuration.
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &EngineConfig) -> Self {
        Self {
            runtime,
            timeout: config.timeout(),
            limits: config.limits.clone(),
            container_root: config.container_root.trim_end_matches('/').to_string(),
            auto_pull: config.auto_pull,
            reap_delay: REAP_DELAY,
        }
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay of the second terminate after a timeout.
    pub fn with_reap_delay(mut self, delay: Duration) -> Self {
        self.reap_delay = delay;
        self
    }

    /// The wall-clock bound applied to each run.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The runtime backing this launcher.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Builds the container invocation for a workspace.
    ///
    /// Only the job's own directory is mounted, at
    /// `<container_root>/<job_id>`, which is also the working directory.
    pub fn invocation(&self, workspace: &Workspace, profile: &LanguageProfile) -> ContainerInvocation {
        let job_dir = format!("{}/{}", self.container_root, workspace.job_id());
        let host_dir = std::fs::canonicalize(workspace.path())
            .unwrap_or_else(|_| workspace.path().to_path_buf());

        ContainerInvocation {
            name: format!("{}{}", CONTAINER_PREFIX, workspace.job_id()),
            image: profile.image.clone(),
            command: profile.command(),
            host_dir,
            mount_point: job_dir.clone(),
            working_dir: job_dir,
            limits: self.limits.clone(),
        }
    }

    /// Runs the job container exactly once.
    ///
    /// Never fails: launch problems become `LaunchFailed`, an expired timer
    /// becomes `TimedOut` after the container has been terminated.
    pub async fn launch(&self, workspace: &Workspace, profile: &LanguageProfile) -> ExecutionOutcome {
        let invocation = self.invocation(workspace, profile);

        if self.auto_pull {
            if let Err(e) = self.runtime.prepare_image(&invocation.image).await {
                warn!(container = %invocation.name, error = %e, "Image preparation failed");
                return ExecutionOutcome::launch_failed(e.to_string(), Duration::ZERO);
            }
        }

        debug!(
            container = %invocation.name,
            image = %invocation.image,
            runtime = self.runtime.name(),
            "Launching container"
        );

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.runtime.run(&invocation)).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(raw)) => {
                debug!(
                    container = %invocation.name,
                    exit_code = raw.exit_code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Container exited"
                );
                ExecutionOutcome::completed(raw.stdout, raw.stderr, raw.exit_code, elapsed)
            }
            Ok(Err(e)) => {
                warn!(container = %invocation.name, error = %e, "Container launch failed");
                ExecutionOutcome::launch_failed(e.to_string(), elapsed)
            }
            Err(_) => {
                info!(
                    container = %invocation.name,
                    timeout_secs = self.timeout.as_secs(),
                    "Container timed out, terminating"
                );
                if let Err(e) = self.runtime.terminate(&invocation.name).await {
                    warn!(container = %invocation.name, error = %e, "Failed to terminate timed out container");
                }
                self.schedule_reap(invocation.name);
                ExecutionOutcome::timed_out(self.timeout, elapsed)
            }
        }
    }
}

impl ExecutionLauncher {
    /// Terminates the container again after `reap_delay`.
    ///
    /// A create request that was in flight when the timer fired can still
    /// produce a container after the first terminate found nothing.
    fn schedule_reap(&self, name: String) {
        let runtime = Arc::clone(&self.runtime);
        let delay = self.reap_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match runtime.terminate(&name).await {
                Ok(()) => debug!(container = %name, "Reaped timed out container"),
                Err(e) => warn!(container = %name, error = %e, "Failed to reap timed out container"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use crate::execution::runtime::RawOutput;
    use crate::language::{Language, LanguageProfile};
    use crate::outcome::{OutcomeStatus, LAUNCH_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE};
    use crate::workspace::WorkspaceManager;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    enum Behavior {
        Exit(i32),
        Hang,
        Fail,
    }

    struct StubRuntime {
        behavior: Behavior,
        runs: Mutex<Vec<ContainerInvocation>>,
        terminated: Mutex<Vec<String>>,
    }

    impl StubRuntime {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                runs: Mutex::new(Vec::new()),
                terminated: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ContainerRuntime for StubRuntime {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn run(&self, invocation: &ContainerInvocation) -> Result<RawOutput, LaunchError> {
            self.runs.lock().unwrap().push(invocation.clone());
            match self.behavior {
                Behavior::Exit(code) => Ok(RawOutput {
                    stdout: "out".to_string(),
                    stderr: "err".to_string(),
                    exit_code: code,
                }),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Behavior::Fail => Err(LaunchError::RuntimeUnavailable("daemon down".to_string())),
            }
        }

        async fn terminate(&self, container_name: &str) -> Result<(), LaunchError> {
            self.terminated.lock().unwrap().push(container_name.to_string());
            Ok(())
        }

        async fn ping(&self) -> Result<(), LaunchError> {
            Ok(())
        }
    }

    fn setup(temp: &TempDir) -> (Workspace, LanguageProfile) {
        let profile = LanguageProfile::builtin(Language::Python);
        let ws = WorkspaceManager::new(temp.path())
            .acquire(Uuid::new_v4(), &profile, "print(1)", "")
            .unwrap();
        (ws, profile)
    }

    #[tokio::test]
    async fn test_completed_run() {
        let temp = TempDir::new().unwrap();
        let (ws, profile) = setup(&temp);
        let runtime = StubRuntime::new(Behavior::Exit(3));
        let launcher = ExecutionLauncher::new(runtime.clone());

        let outcome = launcher.launch(&ws, &profile).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout, "out");
        assert_eq!(runtime.runs.lock().unwrap().len(), 1);
        assert!(runtime.terminated.lock().unwrap().is_empty());
        ws.release().unwrap();
    }

    #[tokio::test]
    async fn test_invocation_binds_job_directory() {
        let temp = TempDir::new().unwrap();
        let (ws, profile) = setup(&temp);
        let launcher = ExecutionLauncher::new(StubRuntime::new(Behavior::Exit(0)));

        let inv = launcher.invocation(&ws, &profile);
        let expected_dir = format!("/usr/src/app/{}", ws.job_id());
        assert_eq!(inv.name, format!("coderun-{}", ws.job_id()));
        assert_eq!(inv.mount_point, expected_dir);
        assert_eq!(inv.working_dir, expected_dir);
        assert_eq!(inv.image, profile.image);
        assert_eq!(inv.command, profile.command());
        assert!(inv.host_dir.is_absolute());
        ws.release().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_terminates_container() {
        let temp = TempDir::new().unwrap();
        let (ws, profile) = setup(&temp);
        let runtime = StubRuntime::new(Behavior::Hang);
        let launcher =
            ExecutionLauncher::new(runtime.clone()).with_timeout(Duration::from_millis(50));

        let outcome = launcher.launch(&ws, &profile).await;
        assert_eq!(outcome.status, OutcomeStatus::TimedOut);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(outcome.stdout.is_empty());
        assert_eq!(
            runtime.terminated.lock().unwrap().as_slice(),
            &[format!("coderun-{}", ws.job_id())]
        );
        ws.release().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_reaps_container_again() {
        let temp = TempDir::new().unwrap();
        let (ws, profile) = setup(&temp);
        let runtime = StubRuntime::new(Behavior::Hang);
        let launcher = ExecutionLauncher::new(runtime.clone())
            .with_timeout(Duration::from_millis(50))
            .with_reap_delay(Duration::from_millis(50));

        let outcome = launcher.launch(&ws, &profile).await;
        assert_eq!(outcome.status, OutcomeStatus::TimedOut);
        assert_eq!(runtime.terminated.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let name = format!("coderun-{}", ws.job_id());
        assert_eq!(
            runtime.terminated.lock().unwrap().as_slice(),
            &[name.clone(), name]
        );
        ws.release().unwrap();
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let temp = TempDir::new().unwrap();
        let (ws, profile) = setup(&temp);
        let launcher = ExecutionLauncher::new(StubRuntime::new(Behavior::Fail));

        let outcome = launcher.launch(&ws, &profile).await;
        assert_eq!(outcome.status, OutcomeStatus::LaunchFailed);
        assert_eq!(outcome.exit_code, LAUNCH_FAILURE_EXIT_CODE);
        assert!(outcome.stderr.contains("daemon down"));
        ws.release().unwrap();
    }
}
