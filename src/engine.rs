//! Execution engine: the single entry point for running untrusted code.
//!
//! One call runs one job:
//!
//! ```text
//! resolve(lang) → admission permit → acquire workspace → launch → release → normalize
//! ```
//!
//! Validation failures are the only errors a caller sees. Everything that
//! goes wrong after validation (workspace I/O, runtime, timeout) is folded
//! into the returned outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, LaunchError, WorkspaceError};
use crate::execution::{ContainerRuntime, ExecutionLauncher, CONTAINER_PREFIX};
use crate::job::{ExecutionRequest, Job, JobState};
use crate::language::{LanguageProfile, LanguageRegistry};
use crate::metrics::MetricsCollector;
use crate::outcome::{normalize, ExecutionOutcome, ExecutionReport};
use crate::workspace::WorkspaceManager;

struct EngineInner {
    config: EngineConfig,
    registry: LanguageRegistry,
    workspaces: WorkspaceManager,
    launcher: ExecutionLauncher,
    admission: Semaphore,
    metrics: MetricsCollector,
}

/// Runs code snippets in disposable containers.
///
/// Cheap to clone; clones share the registry, the admission gate and the
/// runtime, so one engine can serve many tokio tasks.
///
/// # Example
///
/// ```ignore
/// use coderun::{EngineConfig, ExecutionEngine};
/// use coderun::execution::DockerApiRuntime;
///
/// let runtime = std::sync::Arc::new(DockerApiRuntime::connect()?);
/// let engine = ExecutionEngine::new(EngineConfig::default(), runtime)?;
/// let report = engine.run("print('hi')", "", "python").await?;
/// assert_eq!(report.stdout, "hi\n");
/// ```
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    /// Creates an engine from a configuration and a container runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the configuration is invalid and
    /// `EngineError::UnsupportedLanguage` if a language override names an
    /// unknown language.
    pub fn new(config: EngineConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self, EngineError> {
        config.validate()?;
        let registry = LanguageRegistry::with_overrides(&config.languages)?;
        let workspaces = WorkspaceManager::new(config.base_dir.clone());
        let launcher = ExecutionLauncher::from_config(runtime, &config);
        let admission = Semaphore::new(config.max_concurrent_jobs);

        info!(
            base_dir = %config.base_dir.display(),
            runtime = launcher.runtime().name(),
            timeout_secs = config.timeout_secs,
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Execution engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                workspaces,
                launcher,
                admission,
                metrics: MetricsCollector::new(),
            }),
        })
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The language registry.
    pub fn registry(&self) -> &LanguageRegistry {
        &self.inner.registry
    }

    /// The workspace manager.
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.inner.workspaces
    }

    /// Admission permits currently free.
    pub fn available_permits(&self) -> usize {
        self.inner.admission.available_permits()
    }

    /// Checks that the container runtime is reachable.
    pub async fn ping(&self) -> Result<(), LaunchError> {
        self.inner.launcher.runtime().ping().await
    }

    /// Removes workspaces left behind by a previous process that are older
    /// than the configured `stale_after_secs`.
    pub fn sweep_stale(&self) -> Result<usize, WorkspaceError> {
        self.inner.workspaces.sweep_stale(self.inner.config.stale_after())
    }

    /// Removes job containers older than `stale_after_secs`, such as one
    /// created by a request that was still in flight when its job timed out.
    pub async fn sweep_stale_containers(&self) -> Result<usize, LaunchError> {
        let removed = self
            .inner
            .launcher
            .runtime()
            .remove_stale_containers(CONTAINER_PREFIX, self.inner.config.stale_after())
            .await?;
        if removed > 0 {
            info!(removed = removed, "Removed stale job containers");
        }
        Ok(removed)
    }

    /// Runs one job and returns the normalized report.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedLanguage` when `lang` is not
    /// supported. In that case nothing touched the filesystem or the
    /// runtime.
    pub async fn run(&self, code: &str, input: &str, lang: &str) -> Result<ExecutionReport, EngineError> {
        let outcome = self.execute(code, input, lang).await?;
        Ok(normalize(&outcome))
    }

    /// Runs one job and returns the raw outcome.
    ///
    /// # Errors
    ///
    /// See [`ExecutionEngine::run`].
    pub async fn execute(&self, code: &str, input: &str, lang: &str) -> Result<ExecutionOutcome, EngineError> {
        let request = ExecutionRequest {
            code: code.to_string(),
            input: input.to_string(),
            lang: lang.to_string(),
        };
        self.execute_request(&request).await
    }

    /// Runs one job described by a boundary request.
    #[instrument(skip_all, fields(lang = %request.lang))]
    pub async fn execute_request(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EngineError> {
        let mut job = Job::new(request);

        let profile = match self.inner.registry.resolve(&job.lang) {
            Ok(profile) => profile,
            Err(e) => {
                job.transition(JobState::Rejected)?;
                debug!(job_id = %job.id, "Rejected request");
                return Err(e);
            }
        };

        let _permit = match self.inner.admission.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                job.transition(JobState::Released)?;
                return Ok(ExecutionOutcome::launch_failed(e.to_string(), Duration::ZERO));
            }
        };
        let _in_progress = InProgress::start(&self.inner.metrics);

        let outcome = self.run_job(&mut job, profile).await?;

        self.inner.metrics.record_execution(
            profile.language.key(),
            outcome.status.as_str(),
            outcome.duration().as_secs_f64(),
        );
        info!(
            job_id = %job.id,
            status = %outcome.status,
            exit_code = outcome.exit_code,
            duration_ms = outcome.duration_ms,
            "Job finished"
        );

        Ok(outcome)
    }

    async fn run_job(&self, job: &mut Job, profile: &LanguageProfile) -> Result<ExecutionOutcome, EngineError> {
        let workspace = match self.inner.workspaces.acquire(
            job.id,
            profile,
            &job.source_code,
            &job.stdin_data,
        ) {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Workspace provisioning failed");
                job.transition(JobState::LaunchFailed)?;
                job.transition(JobState::Released)?;
                return Ok(ExecutionOutcome::launch_failed(e.to_string(), Duration::ZERO));
            }
        };
        job.workspace_path = Some(workspace.path().to_path_buf());
        job.transition(JobState::Provisioned)?;

        job.transition(JobState::Running)?;
        let outcome = self.inner.launcher.launch(&workspace, profile).await;
        job.transition(outcome.status.into())?;

        if let Err(e) = workspace.release() {
            warn!(job_id = %job.id, error = %e, "Workspace release failed");
        }
        job.transition(JobState::Released)?;

        Ok(outcome)
    }
}

/// Keeps the in-progress gauge balanced even if the job future is dropped.
struct InProgress<'a> {
    metrics: &'a MetricsCollector,
}

impl<'a> InProgress<'a> {
    fn start(metrics: &'a MetricsCollector) -> Self {
        metrics.inc_jobs_in_progress();
        Self { metrics }
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.metrics.dec_jobs_in_progress();
    }
}
