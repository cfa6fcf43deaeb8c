//! surfexp CLI - cycling surface experiment driver.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use surfexp_config::ConfigStore;
use surfexp_core::{compact_dtg, format_dtg, parse_dtg, parse_duration, MemberId, NodeId, SchedulerHandle, TaskKind};
use surfexp_execution::{ExperimentEngine, RunReport, TASK_COMMAND_KEY};
use surfexp_scheduler::{BatchSystem, CommandBatchSystem, CommandTemplates, Operation, SchedulerCommand, StatusReply};
use surfexp_storage::{JsonStorage, Storage};
use surfexp_tasks::TaskRegistry;
use surfexp_tools::{CommandRunner, ProcessRunner};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// File in the state directory listing the configuration layers.
const CONFIG_LIST: &str = "configs.json";

#[derive(Parser)]
#[command(name = "surfexp")]
#[command(about = "Cycling surface experiment driver", long_about = None)]
struct Cli {
    /// Experiment state directory
    #[arg(long, global = true, default_value = ".surfexp")]
    state_dir: PathBuf,
    /// Configuration files, lowest precedence first
    #[arg(long = "config", global = true)]
    configs: Vec<PathBuf>,
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up a new experiment
    Init {
        /// First cycle
        #[arg(long)]
        begin: String,
        /// Last cycle boundary
        #[arg(long)]
        end: String,
    },
    /// Build the suite for the active cycle window
    Build,
    /// Submit the suite
    Submit {
        /// Run every node in this process instead of a batch system
        #[arg(long)]
        local: bool,
    },
    /// Status of selected nodes, or of the whole suite without selectors
    Status {
        /// key=value selectors (experiment, cycle, member, task)
        selectors: Vec<String>,
    },
    /// Kill selected nodes
    Kill {
        /// key=value selectors (experiment, cycle, member, task)
        selectors: Vec<String>,
    },
    /// Settle a submission that timed out
    Resolve {
        /// Task kind
        #[arg(long)]
        task: String,
        /// Cycle
        #[arg(long)]
        cycle: String,
        /// Ensemble member
        #[arg(long)]
        member: Option<u32>,
        /// Handle of the job found in the batch system; without it the
        /// submission is dropped and sent again by the next submit
        #[arg(long)]
        handle: Option<String>,
    },
    /// Move progress forward, e.g. PT3H
    Advance {
        /// ISO 8601 duration
        duration: String,
    },
    /// Run one node in this process
    RunTask {
        /// Task kind
        #[arg(long)]
        task: String,
        /// Cycle
        #[arg(long)]
        cycle: String,
        /// Ensemble member
        #[arg(long)]
        member: Option<u32>,
    },
    /// Show experiment progress
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let storage = Arc::new(JsonStorage::new(&cli.state_dir).await?);

    if let Commands::Init { begin, end } = &cli.command {
        if cli.configs.is_empty() {
            bail!("init needs at least one --config file");
        }
        let mut configs = Vec::with_capacity(cli.configs.len());
        for path in &cli.configs {
            configs.push(
                tokio::fs::canonicalize(path)
                    .await
                    .with_context(|| format!("config file {}", path.display()))?,
            );
        }
        let engine = open_engine(&configs, Arc::clone(&storage)).await?;
        let state = engine.initialize(parse_dtg(begin)?, parse_dtg(end)?).await?;
        tokio::fs::write(cli.state_dir.join(CONFIG_LIST), serde_json::to_vec_pretty(&configs)?).await?;
        println!(
            "Initialized {} from {} to {}",
            engine.config().get_str("general.case")?,
            format_dtg(&state.begin),
            format_dtg(&state.end)
        );
        return Ok(());
    }

    let configs = if cli.configs.is_empty() {
        stored_configs(&cli.state_dir).await?
    } else {
        cli.configs.clone()
    };
    let engine = open_engine(&configs, Arc::clone(&storage)).await?;
    let engine = if engine.config().contains(TASK_COMMAND_KEY) {
        engine
    } else {
        let command = job_command(&cli.state_dir, &configs).await?;
        engine.with_task_command(command)
    };
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Build => {
            let suite = engine.build().await?;
            println!("Suite {}: {} node(s)", suite.name, suite.nodes.len());
            for cycle in suite.cycles() {
                println!("  {}: {} node(s)", format_dtg(&cycle), suite.nodes_for_cycle(cycle).count());
            }
        }
        Commands::Submit { local: true } => {
            let report = engine.run_local(runner).await?;
            print_report(&report);
            if report.has_failures() {
                bail!("some nodes did not succeed");
            }
        }
        Commands::Submit { local: false } => {
            let batch = batch_system(&engine, runner).await?;
            let report = engine.submit(batch).await?;
            println!(
                "Submitted {} node(s), {} already submitted",
                report.submitted.len(),
                report.already_submitted.len()
            );
            for (node, reason) in &report.failed {
                println!("  {} failed: {}", node, reason);
            }
            for (node, reason) in &report.indeterminate {
                println!("  {} unconfirmed: {}, check the batch system and run resolve", node, reason);
            }
            for (node, pred) in &report.held {
                println!("  {} held: {} not submitted", node, pred);
            }
            if !report.is_complete() {
                bail!("submission incomplete, run submit again to retry");
            }
        }
        Commands::Status { selectors } if selectors.is_empty() => {
            let batch = batch_system(&engine, runner).await?;
            print_report(&engine.poll(batch).await?);
        }
        Commands::Status { selectors } => {
            let command = SchedulerCommand::from_parts("status", &selectors)?;
            run_scheduler_command(&engine, batch_system(&engine, runner).await?, command).await?;
        }
        Commands::Kill { selectors } => {
            let command = SchedulerCommand::from_parts("kill", &selectors)?;
            run_scheduler_command(&engine, batch_system(&engine, runner).await?, command).await?;
        }
        Commands::Resolve { task, cycle, member, handle } => {
            let kind: TaskKind = task.parse()?;
            let node = NodeId::new(kind, parse_dtg(&cycle)?, member.map(MemberId));
            let batch = batch_system(&engine, runner).await?;
            let handle = handle.map(SchedulerHandle::new);
            let confirmed = handle.is_some();
            engine.resolve_submission(batch, &node, handle).await?;
            if confirmed {
                println!("{} confirmed", node);
            } else {
                println!("{} will be submitted again", node);
            }
        }
        Commands::Advance { duration } => {
            let state = engine.advance(parse_duration(&duration)?).await?;
            println!("Progress at {} ({:?})", format_dtg(&state.last_processed), state.status());
        }
        Commands::RunTask { task, cycle, member } => {
            let kind: TaskKind = task.parse()?;
            let node = NodeId::new(kind, parse_dtg(&cycle)?, member.map(MemberId));
            let outcome = engine.run_task(node, runner.as_ref()).await?;
            if let Some(error) = &outcome.postfix_error {
                info!("{}: postfix reported {}", node, error);
            }
            if !outcome.result.is_success() {
                bail!("{} failed: {:?}", node, outcome.result);
            }
            println!("{} succeeded", node);
        }
        Commands::Show => {
            let state = engine.progress().await?;
            println!("Experiment {}", engine.config().get_str("general.case")?);
            println!("  Begin: {}", format_dtg(&state.begin));
            println!("  End: {}", format_dtg(&state.end));
            println!("  Current cycle: {}", format_dtg(&state.last_processed));
            println!("  Status: {:?}", state.status());
            if let Some(suite) = storage.load_suite().await? {
                let handles = storage.load_handles().await?;
                println!("  Suite: {} node(s), {} submitted", suite.nodes.len(), handles.len());
            }
        }
    }

    Ok(())
}

async fn open_engine(configs: &[PathBuf], storage: Arc<JsonStorage>) -> Result<ExperimentEngine<JsonStorage>> {
    let store = ConfigStore::from_files(configs).await?;
    Ok(ExperimentEngine::new(store, Arc::new(TaskRegistry::with_defaults()), storage))
}

async fn stored_configs(state_dir: &Path) -> Result<Vec<PathBuf>> {
    let path = state_dir.join(CONFIG_LIST);
    let data = tokio::fs::read(&path)
        .await
        .with_context(|| format!("{} not found, run init first or pass --config", path.display()))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Command a batch job runs: this executable against the same state.
async fn job_command(state_dir: &Path, configs: &[PathBuf]) -> Result<Vec<String>> {
    let exe = std::env::current_exe()?;
    let state_dir = tokio::fs::canonicalize(state_dir).await?;
    let mut command = vec![
        exe.display().to_string(),
        "--state-dir".to_string(),
        state_dir.display().to_string(),
    ];
    for config in configs {
        command.push("--config".to_string());
        command.push(tokio::fs::canonicalize(config).await?.display().to_string());
    }
    command.extend(
        ["run-task", "--task", "{task}", "--cycle", "{cycle}", "{member}"]
            .into_iter()
            .map(String::from),
    );
    Ok(command)
}

/// The configured batch system, or the local one when no `scheduler`
/// section exists.
async fn batch_system(
    engine: &ExperimentEngine<JsonStorage>,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn BatchSystem>> {
    let config = engine.config();
    if config.contains("scheduler.submit") {
        let templates = CommandTemplates::from_config(config)?;
        debug!("Using batch system {}", templates.submit.join(" "));
        return Ok(Arc::new(CommandBatchSystem::new(templates, runner)));
    }
    Ok(Arc::new(engine.local_batch(runner).await?))
}

async fn run_scheduler_command(
    engine: &ExperimentEngine<JsonStorage>,
    batch: Arc<dyn BatchSystem>,
    command: SchedulerCommand,
) -> Result<()> {
    match command.operation {
        Operation::Kill => {
            for node in engine.kill(batch, &command.selector).await? {
                println!("Killed {}", node);
            }
        }
        Operation::Status => {
            for (node, handle, reply) in engine.status(batch, &command.selector).await? {
                let state = match reply {
                    StatusReply::Known(status) => status.to_string(),
                    StatusReply::Indeterminate { last_known: Some(last) } => {
                        format!("indeterminate (last {})", last)
                    }
                    StatusReply::Indeterminate { last_known: None } => "indeterminate".to_string(),
                };
                println!("{} [{}] {}", node, handle, state);
            }
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Experiment {}", report.experiment);
    for line in &report.nodes {
        let handle = line.handle.as_ref().map(|h| h.to_string()).unwrap_or_else(|| "-".to_string());
        println!("  {} [{}] {}", line.node, handle, line.state);
    }
    let summary: Vec<String> = report.summary().iter().map(|(k, v)| format!("{} {}", v, k)).collect();
    println!("Summary: {}", summary.join(", "));
    if let Some(state) = report.advanced {
        println!("Advanced to {} ({:?})", compact_dtg(&state.last_processed), state.status());
    }
}
