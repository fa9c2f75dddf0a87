//! Command-line interface for coderun.
//!
//! Provides commands for running snippets, listing languages, sweeping
//! stale workspaces and checking the container runtime.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
