//! Engine configuration.
//!
//! The configuration is built once at startup and passed into the engine.
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `CODERUN_*` environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execution::resources::ExecutionLimits;

/// Which container runtime backend executes jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker Engine API over the local socket.
    #[default]
    Api,
    /// The `docker` command-line binary.
    Cli,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Api => write!(f, "api"),
            RuntimeKind::Cli => write!(f, "cli"),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" | "bollard" => Ok(RuntimeKind::Api),
            "cli" | "docker" => Ok(RuntimeKind::Cli),
            other => Err(format!("unknown runtime '{}' (expected 'api' or 'cli')", other)),
        }
    }
}

/// Per-language replacement of the built-in image or run command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageOverride {
    pub image: Option<String>,
    pub run_command: Option<String>,
}

/// Configuration for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host directory under which job workspaces are created.
    pub base_dir: PathBuf,
    /// Path inside the container where job workspaces are mounted.
    pub container_root: String,
    /// Wall-clock bound for a single container run, in seconds.
    pub timeout_secs: u64,
    /// Maximum number of jobs running containers at the same time.
    pub max_concurrent_jobs: usize,
    /// Container runtime backend.
    pub runtime: RuntimeKind,
    /// Docker binary used by the CLI backend.
    pub docker_binary: String,
    /// Pull missing images before the timed window starts.
    pub auto_pull: bool,
    /// Age after which a leftover workspace is considered stale, in seconds.
    pub stale_after_secs: u64,
    /// Resource limits applied to every container.
    pub limits: ExecutionLimits,
    /// Per-language image/command overrides keyed by language key.
    pub languages: BTreeMap<String, LanguageOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./code"),
            container_root: "/usr/src/app".to_string(),
            timeout_secs: 10,
            max_concurrent_jobs: 4,
            runtime: RuntimeKind::Api,
            docker_binary: "docker".to_string(),
            auto_pull: false,
            stale_after_secs: 600,
            limits: ExecutionLimits::default(),
            languages: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration: defaults, then the YAML file (if given), then the
    /// process environment. The result is validated.
    ///
    /// # Environment Variables
    ///
    /// - `CODERUN_BASE_DIR`: workspace base directory (default: ./code)
    /// - `CODERUN_CONTAINER_ROOT`: mount root inside containers (default: /usr/src/app)
    /// - `CODERUN_TIMEOUT_SECS`: wall-clock timeout (default: 10)
    /// - `CODERUN_MAX_CONCURRENT`: admission limit (default: 4)
    /// - `CODERUN_RUNTIME`: `api` or `cli` (default: api)
    /// - `CODERUN_DOCKER_BINARY`: docker binary for the CLI backend (default: docker)
    /// - `CODERUN_AUTO_PULL`: pull missing images (default: false)
    /// - `CODERUN_MEMORY_MB`: container memory limit (default: 512)
    /// - `CODERUN_CPU_CORES`: container CPU cores (default: 1.0)
    /// - `CODERUN_NETWORK_MODE`: container network mode (default: none)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML configuration file. Missing keys take default values.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parses a YAML configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `CODERUN_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CODERUN_BASE_DIR") {
            self.base_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CODERUN_CONTAINER_ROOT") {
            self.container_root = v;
        }
        if let Some(v) = parse_var(&lookup, "CODERUN_TIMEOUT_SECS")? {
            self.timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "CODERUN_MAX_CONCURRENT")? {
            self.max_concurrent_jobs = v;
        }
        if let Some(v) = parse_var(&lookup, "CODERUN_RUNTIME")? {
            self.runtime = v;
        }
        if let Some(v) = lookup("CODERUN_DOCKER_BINARY") {
            self.docker_binary = v;
        }
        if let Some(v) = parse_var(&lookup, "CODERUN_AUTO_PULL")? {
            self.auto_pull = v;
        }
        if let Some(v) = parse_var(&lookup, "CODERUN_MEMORY_MB")? {
            self.limits.memory_mb = v;
        }
        if let Some(v) = parse_var(&lookup, "CODERUN_CPU_CORES")? {
            self.limits.cpu_cores = v;
        }
        if let Some(v) = lookup("CODERUN_NETWORK_MODE") {
            self.limits.network_mode = v;
        }
        Ok(())
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(invalid("base_dir", "must not be empty"));
        }
        if !self.container_root.starts_with('/') {
            return Err(invalid("container_root", "must be an absolute path"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be greater than zero"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs", "must be greater than zero"));
        }
        if self.docker_binary.trim().is_empty() {
            return Err(invalid("docker_binary", "must not be empty"));
        }
        if self.limits.memory_mb == 0 {
            return Err(invalid("limits.memory_mb", "must be greater than zero"));
        }
        if !(self.limits.cpu_cores > 0.0) {
            return Err(invalid("limits.cpu_cores", "must be greater than zero"));
        }
        if self.limits.max_output_bytes == 0 {
            return Err(invalid("limits.max_output_bytes", "must be greater than zero"));
        }
        Ok(())
    }

    /// The wall-clock timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The stale-workspace threshold as a `Duration`.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Sets the workspace base directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Sets the admission limit.
    pub fn with_max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n;
        self
    }

    /// Sets the runtime backend.
    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &e.to_string())),
        None => Ok(None),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
