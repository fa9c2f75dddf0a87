//! Engine behavior against a scripted container runtime.
//!
//! The runtime reads the source file from the mounted workspace and treats
//! it as a tiny script, so these tests need no Docker daemon:
//!
//! - `echo:<text>` prints `<text>` and exits 0
//! - `exit:<n>` exits with `n`
//! - `cat` copies `input.txt` to stdout
//! - `hang` never finishes
//! - `fail` reports a launch error

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coderun::execution::{ContainerInvocation, ContainerRuntime, RawOutput};
use coderun::{
    EngineConfig, EngineError, EngineResponse, ExecutionEngine, LaunchError, OutcomeStatus,
};
use tempfile::TempDir;

#[derive(Default)]
struct ScriptedRuntime {
    runs: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    terminated: Mutex<Vec<String>>,
    invocations: Mutex<Vec<ContainerInvocation>>,
}

impl ScriptedRuntime {
    fn read_source(dir: &Path) -> String {
        std::fs::read_dir(dir)
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .find(|entry| entry.file_name() != "input.txt")
            .and_then(|entry| std::fs::read_to_string(entry.path()).ok())
            .unwrap_or_default()
    }

    async fn interpret(&self, invocation: &ContainerInvocation) -> Result<RawOutput, LaunchError> {
        let script = Self::read_source(&invocation.host_dir);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let output = |stdout: String, exit_code: i32| RawOutput {
            stdout,
            stderr: String::new(),
            exit_code,
        };

        if let Some(text) = script.strip_prefix("echo:") {
            Ok(output(text.to_string(), 0))
        } else if let Some(code) = script.strip_prefix("exit:") {
            Ok(output(String::new(), code.trim().parse().unwrap_or(1)))
        } else if script == "cat" {
            let input = std::fs::read_to_string(invocation.host_dir.join("input.txt"))
                .map_err(|e| LaunchError::StartFailed(e.to_string()))?;
            Ok(output(input, 0))
        } else if script == "hang" {
            std::future::pending::<()>().await;
            unreachable!()
        } else if script == "fail" {
            Err(LaunchError::RuntimeUnavailable("scripted failure".to_string()))
        } else {
            Ok(output(String::new(), 127))
        }
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<RawOutput, LaunchError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.interpret(invocation).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn terminate(&self, container_name: &str) -> Result<(), LaunchError> {
        self.terminated.lock().unwrap().push(container_name.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), LaunchError> {
        Ok(())
    }
}

struct Harness {
    _temp: TempDir,
    base_dir: std::path::PathBuf,
    runtime: Arc<ScriptedRuntime>,
    engine: ExecutionEngine,
}

fn harness(configure: impl FnOnce(EngineConfig) -> EngineConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let base_dir = temp.path().join("code");
    let runtime = Arc::new(ScriptedRuntime::default());
    let config = configure(
        EngineConfig::default()
            .with_base_dir(&base_dir)
            .with_timeout(Duration::from_secs(5)),
    );
    let engine = ExecutionEngine::new(config, runtime.clone()).unwrap();
    Harness {
        _temp: temp,
        base_dir,
        runtime,
        engine,
    }
}

fn leftover_entries(base_dir: &Path) -> usize {
    std::fs::read_dir(base_dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_successful_program() {
    let h = harness(|c| c);

    let report = h.engine.run("echo:X", "", "python").await.unwrap();

    assert!(report.success);
    assert_eq!(report.exit_code, 0);
    assert!(report.stdout.contains('X'));
    assert_eq!(h.runtime.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stdin_reaches_program() {
    let h = harness(|c| c);

    let report = h.engine.run("cat", "1 2\n", "c").await.unwrap();

    assert_eq!(report.stdout, "1 2\n");
}

#[tokio::test]
async fn test_non_zero_exit_is_reported_not_raised() {
    let h = harness(|c| c);

    let report = h.engine.run("exit:3", "", "java").await.unwrap();

    assert!(!report.success);
    assert_eq!(report.exit_code, 3);
    assert_eq!(EngineResponse::from(Ok::<_, EngineError>(report)).status_code(), 400);
}

#[tokio::test]
async fn test_no_workspace_left_on_any_path() {
    let h = harness(|c| c.with_timeout(Duration::from_secs(1)));

    for code in ["echo:ok", "exit:2", "hang", "fail", ""] {
        let _ = h.engine.run(code, "in", "python").await.unwrap();
        assert_eq!(leftover_entries(&h.base_dir), 0, "leftover after {:?}", code);
    }
    assert_eq!(h.engine.workspaces().active_count().unwrap(), 0);
}

#[tokio::test]
async fn test_timeout_terminates_container() {
    let h = harness(|c| c.with_timeout(Duration::from_secs(1)));

    let outcome = h.engine.execute("hang", "", "java").await.unwrap();
    let report = coderun::normalize(&outcome);

    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert!(!report.success);
    assert_eq!(report.exit_code, 124);
    assert!(report.stdout.is_empty());

    let terminated = h.runtime.terminated.lock().unwrap().clone();
    let invocations = h.runtime.invocations.lock().unwrap().clone();
    assert_eq!(terminated.len(), 1);
    assert_eq!(terminated[0], invocations[0].name);
    assert!(terminated[0].starts_with("coderun-"));
}

#[tokio::test]
async fn test_launch_failure() {
    let h = harness(|c| c);

    let report = h.engine.run("fail", "", "c").await.unwrap();

    assert!(!report.success);
    assert_eq!(report.exit_code, -1);
    assert!(report.stderr.contains("scripted failure"));
    assert_eq!(EngineResponse::from(Ok::<_, EngineError>(report)).status_code(), 500);
}

#[tokio::test]
async fn test_unsupported_language_has_no_side_effects() {
    let h = harness(|c| c);

    let result = h.engine.run("package main", "", "go").await;

    assert!(matches!(result, Err(EngineError::UnsupportedLanguage(ref l)) if l == "go"));
    assert!(!h.base_dir.exists());
    assert_eq!(h.runtime.runs.load(Ordering::SeqCst), 0);

    let response = EngineResponse::from(result);
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({"error": "unsupported language: go"})
    );
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let h = harness(|c| c.with_max_concurrent_jobs(8));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                let marker = format!("marker-{}", i);
                let report = engine
                    .run(&format!("echo:{}", marker), "", "python")
                    .await
                    .unwrap();
                (marker, report)
            })
        })
        .collect();

    for handle in handles {
        let (marker, report) = handle.await.unwrap();
        assert_eq!(report.stdout, marker);
    }

    let invocations = h.runtime.invocations.lock().unwrap().clone();
    let mut names: Vec<_> = invocations.iter().map(|i| i.name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 16);
    assert_eq!(leftover_entries(&h.base_dir), 0);
}

#[tokio::test]
async fn test_admission_bound() {
    let h = harness(|c| c.with_max_concurrent_jobs(2));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.run(&format!("echo:{}", i), "", "c").await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }

    assert!(h.runtime.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.runtime.runs.load(Ordering::SeqCst), 8);
    assert_eq!(h.engine.available_permits(), 2);
}

#[tokio::test]
async fn test_identical_requests_are_deterministic() {
    let h = harness(|c| c);

    let first = h.engine.run("echo:same", "x", "python").await.unwrap();
    let second = h.engine.run("echo:same", "x", "python").await.unwrap();

    assert_eq!(first.stdout, second.stdout);
    assert_eq!(first.exit_code, second.exit_code);
}

#[tokio::test]
async fn test_dropped_call_still_removes_workspace() {
    let h = harness(|c| c.with_timeout(Duration::from_secs(30)));

    let cancelled =
        tokio::time::timeout(Duration::from_millis(100), h.engine.run("hang", "", "python")).await;

    assert!(cancelled.is_err());
    assert_eq!(leftover_entries(&h.base_dir), 0);
    assert_eq!(h.engine.available_permits(), h.engine.config().max_concurrent_jobs);
}

#[tokio::test]
async fn test_invocation_mounts_only_the_job_directory() {
    let h = harness(|c| c);

    h.engine.run("echo:x", "", "c").await.unwrap();

    let invocation = h.runtime.invocations.lock().unwrap()[0].clone();
    let job_dir = invocation.host_dir.file_name().unwrap().to_str().unwrap().to_string();
    assert_eq!(invocation.mount_point, format!("/usr/src/app/{}", job_dir));
    assert_eq!(invocation.working_dir, invocation.mount_point);
    assert_eq!(invocation.name, format!("coderun-{}", job_dir));
    assert_eq!(invocation.image, "gcc:13");
    assert_eq!(invocation.command[..2], ["sh".to_string(), "-c".to_string()]);
}
