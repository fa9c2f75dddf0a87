//! Workspace allocation and release.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::WorkspaceError;
use crate::language::{LanguageProfile, STDIN_FILENAME};
use crate::metrics::MetricsCollector;

use super::cleaner::WorkspaceCleaner;

/// Allocates job directories under a fixed base directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Creates a manager rooted at `base_dir`. The directory is created
    /// lazily on first acquire.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The base directory holding all job workspaces.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The directory a job would occupy.
    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.base_dir.join(job_id.to_string())
    }

    /// Creates the job directory and writes the source and stdin files.
    ///
    /// On a write failure the partially populated directory is removed
    /// before the error is returned.
    pub fn acquire(
        &self,
        job_id: Uuid,
        profile: &LanguageProfile,
        code: &str,
        input: &str,
    ) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.base_dir).map_err(|source| WorkspaceError::Create {
            path: self.base_dir.clone(),
            source,
        })?;

        let path = self.path_for(job_id);
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::AlreadyExists(path));
            }
            Err(source) => return Err(WorkspaceError::Create { path, source }),
        }

        let workspace = Workspace {
            job_id,
            source_path: path.join(&profile.source_filename),
            stdin_path: path.join(STDIN_FILENAME),
            path,
            released: false,
        };

        let written = write_file(&workspace.source_path, code)
            .and_then(|()| write_file(&workspace.stdin_path, input));
        if let Err(e) = written {
            if let Err(cleanup) = workspace.release() {
                warn!(job_id = %job_id, error = %cleanup, "Failed to remove partial workspace");
            }
            return Err(e);
        }

        debug!(job_id = %job_id, path = %workspace.path.display(), "Workspace provisioned");
        Ok(workspace)
    }

    /// A cleaner over the same base directory.
    pub fn cleaner(&self) -> WorkspaceCleaner {
        WorkspaceCleaner::new(self.base_dir.clone())
    }

    /// Number of job directories currently present.
    pub fn active_count(&self) -> Result<usize, WorkspaceError> {
        self.cleaner().active_count()
    }

    /// Removes job directories older than `max_age`, returning how many
    /// were removed.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize, WorkspaceError> {
        Ok(self.cleaner().sweep(max_age)?.removed)
    }
}

/// Scoped handle to one job directory.
///
/// Call [`Workspace::release`] on the normal path. A guard dropped without
/// release (early return, panic, cancelled future) removes the directory in
/// `Drop`, so removal happens exactly once on every path.
#[derive(Debug)]
pub struct Workspace {
    job_id: Uuid,
    path: PathBuf,
    source_path: PathBuf,
    stdin_path: PathBuf,
    released: bool,
}

impl Workspace {
    /// The job this workspace belongs to.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Host path of the job directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host path of the source file.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Host path of the stdin file.
    pub fn stdin_path(&self) -> &Path {
        &self.stdin_path
    }

    /// Removes the job directory. A directory that is already gone counts
    /// as released.
    pub fn release(mut self) -> Result<(), WorkspaceError> {
        self.released = true;
        let result = remove_workspace_dir(&self.path);
        match &result {
            Ok(()) => debug!(job_id = %self.job_id, "Workspace released"),
            Err(_) => MetricsCollector::new().record_release_failure(),
        }
        result
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(job_id = %self.job_id, "Workspace dropped without release, removing");
        if let Err(e) = remove_workspace_dir(&self.path) {
            MetricsCollector::new().record_release_failure();
            warn!(job_id = %self.job_id, error = %e, "Failed to remove workspace on drop");
        }
    }
}

/// Recursively removes a workspace directory, ignoring a missing path.
pub(crate) fn remove_workspace_dir(path: &Path) -> Result<(), WorkspaceError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(WorkspaceError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), WorkspaceError> {
    fs::write(path, content).map_err(|source| WorkspaceError::Write {
        path: path.to_path_buf(),
        source,
    })
}
