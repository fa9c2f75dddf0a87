//! Prometheus metrics for the execution engine.
//!
//! # Example
//!
//! ```ignore
//! use coderun::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_execution("c", "completed", 0.8);
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    EXECUTIONS_TOTAL, EXECUTION_DURATION, JOBS_IN_PROGRESS, REGISTRY, WORKSPACE_RELEASE_FAILURES,
};
