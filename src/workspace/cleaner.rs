//! Stale workspace sweeping.
//!
//! A workspace outlives its job only when the process dies mid-execution.
//! The cleaner finds such leftovers under the base directory and removes
//! them. Only directories named like a job id are considered, so unrelated
//! content in the base directory is never touched.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WorkspaceError;

use super::manager::remove_workspace_dir;

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Job directories removed.
    pub removed: usize,
    /// Job directories that could not be removed.
    pub failed: usize,
    /// Job directories younger than the threshold.
    pub kept: usize,
}

/// Finds and removes leftover job directories.
#[derive(Debug, Clone)]
pub struct WorkspaceCleaner {
    base_dir: PathBuf,
}

impl WorkspaceCleaner {
    /// Creates a cleaner for the given base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Lists job directories currently present under the base directory.
    pub fn job_dirs(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() && is_job_dir(&path) {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Number of job directories currently present.
    pub fn active_count(&self) -> Result<usize, WorkspaceError> {
        Ok(self.job_dirs()?.len())
    }

    /// Removes job directories last modified more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> Result<SweepReport, WorkspaceError> {
        let now = SystemTime::now();
        let mut report = SweepReport::default();

        for dir in self.job_dirs()? {
            let age = fs::metadata(&dir)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();

            if age < max_age {
                report.kept += 1;
                continue;
            }

            match remove_workspace_dir(&dir) {
                Ok(()) => {
                    debug!(path = %dir.display(), age_secs = age.as_secs(), "Removed stale workspace");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to remove stale workspace");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            info!(
                removed = report.removed,
                failed = report.failed,
                kept = report.kept,
                "Stale workspace sweep finished"
            );
        }
        Ok(report)
    }
}

fn is_job_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| Uuid::parse_str(name).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_base_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let cleaner = WorkspaceCleaner::new(temp.path().join("nope"));
        assert_eq!(cleaner.active_count().unwrap(), 0);
        assert_eq!(cleaner.sweep(Duration::ZERO).unwrap(), SweepReport::default());
    }

    #[test]
    fn test_sweep_only_touches_job_dirs() {
        let temp = TempDir::new().unwrap();
        let job = temp.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&job).unwrap();
        fs::write(job.join("main.c"), "int main(){}").unwrap();

        let unrelated = temp.path().join("keep-me");
        fs::create_dir(&unrelated).unwrap();
        fs::write(temp.path().join(Uuid::new_v4().to_string()), "a file").unwrap();

        let cleaner = WorkspaceCleaner::new(temp.path());
        assert_eq!(cleaner.active_count().unwrap(), 1);

        let report = cleaner.sweep(Duration::ZERO).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(!job.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_sweep_keeps_young_dirs() {
        let temp = TempDir::new().unwrap();
        let job = temp.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&job).unwrap();

        let cleaner = WorkspaceCleaner::new(temp.path());
        let report = cleaner.sweep(Duration::from_secs(3600)).unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.removed, 0);
        assert!(job.exists());
    }
}
