//! conductor CLI: run, resume, or inspect a pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use conductor::config::PipelineConfig;
use conductor::coordinator::Coordinator;
use conductor::session::ollama::OllamaWorker;
use conductor::session::worker::{ModelWorker, WorkerPool};
use conductor::state::store::StateStore;
use conductor::state::task::{IssueType, Task};
use conductor::tools::registry::ToolRegistry;
use conductor::ui::progress;
use conductor::ui::StatusDisplay;

#[derive(Parser)]
#[command(name = "conductor", version, about = "Autonomous multi-phase development pipeline")]
struct Cli {
    /// Target project directory.
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start (or resume) the pipeline loop.
    Run {
        /// Seed a task before starting: "description:file1,file2".
        #[arg(long)]
        task: Vec<String>,
        /// Suppress the interactive spinner.
        #[arg(long)]
        quiet: bool,
    },
    /// Print the current snapshot summary without running anything.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(&cli.project)?;

    match cli.command {
        Command::Run { task, quiet } => run(config, task, quiet).await,
        Command::Status => status(config),
    }
}

async fn run(config: PipelineConfig, seed_tasks: Vec<String>, quiet: bool) -> Result<()> {
    let workers: Vec<Arc<dyn ModelWorker>> = config
        .workers
        .iter()
        .map(|w| Arc::new(OllamaWorker::new(w)) as Arc<dyn ModelWorker>)
        .collect();
    anyhow::ensure!(
        !workers.is_empty(),
        "no workers configured; add a [[workers]] section to the config"
    );
    let pool = WorkerPool::new(workers, config.worker_timeout());
    let registry = ToolRegistry::with_builtins();
    let mut coordinator = Coordinator::new(config, pool, &registry)?;

    for spec in seed_tasks {
        coordinator.add_task(parse_task_spec(&spec)?);
    }

    let display = if quiet {
        StatusDisplay::hidden()
    } else {
        StatusDisplay::new()
    };
    loop {
        let report = coordinator.step().await?;
        if report == conductor::IterationReport::Idle {
            break;
        }
        display.iteration(coordinator.state().iteration, &report);
    }
    display.finish(coordinator.state());
    Ok(())
}

fn status(config: PipelineConfig) -> Result<()> {
    let store = StateStore::new(config.state_file());
    let state = store
        .load_or_new()
        .context("Failed to read the state snapshot")?;
    progress::print_summary(&state);
    Ok(())
}

/// Parse "description:file1,file2" into a task.
fn parse_task_spec(spec: &str) -> Result<Task> {
    let (description, files) = spec
        .split_once(':')
        .context("task spec must be \"description:file1,file2\"")?;
    let targets: Vec<String> = files
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect();
    anyhow::ensure!(!targets.is_empty(), "task spec names no target files");
    Ok(Task::new(description.trim(), targets, IssueType::GenericFix))
}
