//! High-level recording interface over the raw Prometheus statics.
//!
//! Every method is a no-op until `init_metrics()` has run.

use super::prometheus::{
    EXECUTIONS_TOTAL, EXECUTION_DURATION, JOBS_IN_PROGRESS, WORKSPACE_RELEASE_FAILURES,
};

/// Metrics collector for recording engine metrics.
///
/// # Example
///
/// ```ignore
/// use coderun::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_execution("python", "completed", 0.42);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one finished execution.
    ///
    /// # Arguments
    ///
    /// * `language` - Language key (e.g. "c", "python")
    /// * `status` - Outcome status (`completed`, `timed_out`, `launch_failed`)
    /// * `duration_secs` - Wall-clock time in seconds
    pub fn record_execution(&self, language: &str, status: &str, duration_secs: f64) {
        if let Some(total) = EXECUTIONS_TOTAL.get() {
            total.with_label_values(&[language, status]).inc();
        }

        if let Some(duration) = EXECUTION_DURATION.get() {
            duration.with_label_values(&[language]).observe(duration_secs);
        }

        tracing::trace!(
            language = language,
            status = status,
            duration_secs = duration_secs,
            "Recorded execution metric"
        );
    }

    /// Increment the in-progress gauge.
    pub fn inc_jobs_in_progress(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    /// Decrement the in-progress gauge.
    pub fn dec_jobs_in_progress(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.dec();
        }
    }

    /// Record a workspace directory that could not be removed.
    pub fn record_release_failure(&self) {
        if let Some(counter) = WORKSPACE_RELEASE_FAILURES.get() {
            counter.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::prometheus::init_metrics;

    #[test]
    fn test_record_execution() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        let total = EXECUTIONS_TOTAL.get().unwrap();
        let before = total.with_label_values(&["java", "timed_out"]).get();

        collector.record_execution("java", "timed_out", 10.0);

        assert!(total.with_label_values(&["java", "timed_out"]).get() >= before + 1.0);
    }

    #[test]
    fn test_release_failure_counter() {
        init_metrics().unwrap();
        let counter = WORKSPACE_RELEASE_FAILURES.get().unwrap();
        let before = counter.get();

        MetricsCollector::new().record_release_failure();

        assert!(counter.get() >= before + 1.0);
    }

    #[test]
    fn test_gauge_round_trip_does_not_panic() {
        let collector = MetricsCollector::default();
        collector.inc_jobs_in_progress();
        collector.dec_jobs_in_progress();
    }
}
