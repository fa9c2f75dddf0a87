//! Prometheus metrics registration and export.
//!
//! Metrics live in `OnceLock` statics and stay empty until [`init_metrics`]
//! runs, so library users that never call it pay nothing.

use prometheus::{Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all coderun metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total executions, labeled by language and outcome status.
pub static EXECUTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Execution wall-clock duration in seconds, labeled by language.
pub static EXECUTION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs between admission and release.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Workspace directories that could not be removed.
pub static WORKSPACE_RELEASE_FAILURES: OnceLock<Counter> = OnceLock::new();

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Calling it more than once is harmless: the first registry wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let executions_total = CounterVec::new(
        Opts::new("coderun_executions_total", "Total number of executions"),
        &["language", "status"],
    )?;

    let execution_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "coderun_execution_duration_seconds",
            "Execution wall-clock duration in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["language"],
    )?;

    let jobs_in_progress = Gauge::new(
        "coderun_jobs_in_progress",
        "Number of jobs currently holding a workspace",
    )?;

    let release_failures = Counter::new(
        "coderun_workspace_release_failures_total",
        "Workspace directories that could not be removed",
    )?;

    registry.register(Box::new(executions_total.clone()))?;
    registry.register(Box::new(execution_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(release_failures.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = EXECUTIONS_TOTAL.set(executions_total);
    let _ = EXECUTION_DURATION.set(execution_duration);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = WORKSPACE_RELEASE_FAILURES.set(release_failures);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        init_metrics().unwrap();
        EXECUTIONS_TOTAL
            .get()
            .unwrap()
            .with_label_values(&["python", "completed"])
            .inc();

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("coderun_executions_total"));
    }
}
