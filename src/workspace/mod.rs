//! Per-job workspaces.
//!
//! Every job gets a private directory under the configured base directory,
//! named by its job id. The directory holds exactly the source file and the
//! stdin file for the lifetime of one execution.
//!
//! # Layout
//!
//! ```text
//! <base_dir>/
//!   <job-id>/
//!     main.py
//!     input.txt
//! ```
//!
//! - **Manager** (`manager`): acquires workspaces and hands out the
//!   [`Workspace`] guard that removes the directory exactly once.
//! - **Cleaner** (`cleaner`): sweeps directories left behind by a crashed
//!   process.

pub mod cleaner;
pub mod manager;

pub use cleaner::{SweepReport, WorkspaceCleaner};
pub use manager::{Workspace, WorkspaceManager};
