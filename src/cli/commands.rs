//! CLI command definitions for coderun.
//!
//! Each subcommand builds what it needs from the loaded `EngineConfig`;
//! `run`, `check` and `sweep` talk to the container runtime.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{EngineConfig, RuntimeKind};
use crate::engine::ExecutionEngine;
use crate::execution::{runtime_from_config, CONTAINER_PREFIX};
use crate::language::LanguageRegistry;
use crate::metrics::{export_metrics, init_metrics};
use crate::response::EngineResponse;
use crate::workspace::WorkspaceManager;

/// Run untrusted C, Python and Java snippets in disposable containers.
#[derive(Parser)]
#[command(name = "coderun")]
#[command(about = "Run untrusted code snippets in disposable Docker containers")]
#[command(version)]
#[command(
    long_about = "coderun executes a C, Python or Java snippet inside a throwaway container with a wall-clock timeout and resource limits, then reports stdout, stderr and the exit code.\n\nExample usage:\n  coderun run --lang python --code \"print('hi')\"\n  echo 'int main(){return 3;}' | coderun run --lang c --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Path to a YAML configuration file.
    #[arg(short, long, global = true, env = "CODERUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container runtime backend, overriding the configuration.
    #[arg(long, global = true, value_enum)]
    pub runtime: Option<RuntimeKind>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one snippet and print its output.
    ///
    /// The process exits with the program's exit code (124 on timeout).
    Run(RunArgs),

    /// List supported languages with their images.
    #[command(alias = "langs")]
    Languages,

    /// Remove workspaces left behind by crashed runs.
    Sweep(SweepArgs),

    /// Check that the container runtime is reachable.
    Check,
}

/// Arguments for `coderun run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Language key (c, python, java).
    #[arg(short = 'L', long, default_value = "c")]
    pub lang: String,

    /// Read the source code from this file.
    #[arg(short, long, conflicts_with = "code")]
    pub file: Option<PathBuf>,

    /// Source code text. Read from stdin when neither --code nor --file is given.
    #[arg(long)]
    pub code: Option<String>,

    /// Text fed to the program's stdin.
    #[arg(short, long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Feed the program's stdin from this file.
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Print the `{stdout, stderr, exitCode, success}` JSON object.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics to stderr after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `coderun sweep`.
#[derive(Parser, Debug)]
pub struct SweepArgs {
    /// Minimum age in seconds; defaults to `stale_after_secs` from the configuration.
    #[arg(long)]
    pub max_age_secs: Option<u64>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<i32> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Returns the process exit code.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Run(args) => run_run_command(config, args).await,
        Commands::Languages => run_languages_command(&config),
        Commands::Sweep(args) => run_sweep_command(&config, args).await,
        Commands::Check => run_check_command(config).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(runtime) = cli.runtime {
        config.runtime = runtime;
    }
    Ok(config)
}

async fn build_engine(config: EngineConfig) -> anyhow::Result<ExecutionEngine> {
    let runtime = runtime_from_config(&config).context("Failed to connect to container runtime")?;
    let engine = ExecutionEngine::new(config, runtime)?;

    match engine.sweep_stale() {
        Ok(0) => {}
        Ok(removed) => info!(removed = removed, "Removed stale workspaces"),
        Err(e) => warn!(error = %e, "Stale workspace sweep failed"),
    }
    if let Err(e) = engine.sweep_stale_containers().await {
        warn!(error = %e, "Stale container sweep failed");
    }

    Ok(engine)
}

// ============================================================================
// run
// ============================================================================

async fn run_run_command(config: EngineConfig, args: RunArgs) -> anyhow::Result<i32> {
    if args.metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    let code = read_code(&args)?;
    let input = read_input(&args)?;
    let engine = build_engine(config).await?;

    let result = engine.run(&code, &input, &args.lang).await;
    let response = EngineResponse::from(result);

    let exit_code = match &response {
        EngineResponse::Report(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", report.stdout);
                eprint!("{}", report.stderr);
            }
            report.exit_code
        }
        EngineResponse::Error { error, .. } => {
            if !args.json {
                anyhow::bail!("{}", error);
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
            1
        }
    };

    if args.metrics {
        eprint!("{}", export_metrics());
    }

    Ok(exit_code)
}

fn read_code(args: &RunArgs) -> anyhow::Result<String> {
    if let Some(code) = &args.code {
        return Ok(code.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file {}", path.display()));
    }
    let mut code = String::new();
    std::io::stdin()
        .read_to_string(&mut code)
        .context("Failed to read source code from stdin")?;
    Ok(code)
}

fn read_input(args: &RunArgs) -> anyhow::Result<String> {
    if let Some(input) = &args.input {
        return Ok(input.clone());
    }
    match &args.input_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display())),
        None => Ok(String::new()),
    }
}

// ============================================================================
// languages / sweep / check
// ============================================================================

fn run_languages_command(config: &EngineConfig) -> anyhow::Result<i32> {
    let registry = LanguageRegistry::with_overrides(&config.languages)?;
    for profile in registry.profiles() {
        println!(
            "{:<8} {:<26} {}",
            profile.language.key(),
            profile.image,
            profile.source_filename
        );
    }
    Ok(0)
}

#[derive(Debug, Serialize)]
struct SweepOutput {
    base_dir: String,
    removed: usize,
    failed: usize,
    kept: usize,
    containers_removed: Option<usize>,
}

async fn run_sweep_command(config: &EngineConfig, args: SweepArgs) -> anyhow::Result<i32> {
    let max_age = args
        .max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.stale_after());
    let mut output = sweep_workspaces(config, max_age)?;

    let containers = match runtime_from_config(config) {
        Ok(runtime) => runtime.remove_stale_containers(CONTAINER_PREFIX, max_age).await,
        Err(e) => Err(e),
    };
    match containers {
        Ok(removed) => output.containers_removed = Some(removed),
        Err(e) => warn!(error = %e, "Stale container sweep failed"),
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if output.failed > 0 { 1 } else { 0 })
}

fn sweep_workspaces(config: &EngineConfig, max_age: Duration) -> anyhow::Result<SweepOutput> {
    let cleaner = WorkspaceManager::new(config.base_dir.clone()).cleaner();
    let report = cleaner.sweep(max_age)?;

    Ok(SweepOutput {
        base_dir: config.base_dir.display().to_string(),
        removed: report.removed,
        failed: report.failed,
        kept: report.kept,
        containers_removed: None,
    })
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    runtime: String,
    reachable: bool,
    error: Option<String>,
    base_dir: String,
    active_workspaces: usize,
    languages: Vec<&'static str>,
}

async fn run_check_command(config: EngineConfig) -> anyhow::Result<i32> {
    let runtime = runtime_from_config(&config).context("Failed to connect to container runtime")?;
    let engine = ExecutionEngine::new(config, Arc::clone(&runtime))?;

    let ping = engine.ping().await;
    let output = CheckOutput {
        runtime: runtime.name().to_string(),
        reachable: ping.is_ok(),
        error: ping.err().map(|e| e.to_string()),
        base_dir: engine.config().base_dir.display().to_string(),
        active_workspaces: engine.workspaces().active_count()?,
        languages: engine.registry().languages(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if output.reachable { 0 } else { 1 })
}
