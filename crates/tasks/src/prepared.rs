//! Prepared tasks and the step runner shared by every kind.

use crate::error::{ExecutionResult, FailureReason, TaskError};
use std::path::{Path, PathBuf};
use surfexp_core::NodeId;
use surfexp_tools::{CommandRunner, CommandSpec, ToolError};
use tokio::fs;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 20;

/// One action of a prepared task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run an external command (in the work directory unless it sets its own)
    Run(CommandSpec),
    /// Write a file
    WriteFile {
        /// Target
        path: PathBuf,
        /// Content
        contents: String,
    },
    /// Copy a file, creating the target directory
    Copy {
        /// Source
        from: PathBuf,
        /// Target
        to: PathBuf,
    },
    /// Remove a directory tree if it exists
    RemoveDir(PathBuf),
}

/// A fully resolved task instance, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTask {
    /// Node identity
    pub node: NodeId,
    /// Work directory
    pub workdir: PathBuf,
    /// Files that must exist before the first step
    pub inputs: Vec<PathBuf>,
    /// Actions, in order
    pub steps: Vec<Step>,
    /// Files that must exist after the last step
    pub outputs: Vec<PathBuf>,
    /// Log files (relative to the work directory) archived by `postfix`
    pub logs: Vec<String>,
    /// Where logs are archived
    pub log_dir: Option<PathBuf>,
}

impl PreparedTask {
    /// Empty task for a node.
    pub fn new(node: NodeId, workdir: PathBuf) -> Self {
        Self {
            node,
            workdir,
            inputs: Vec::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
            logs: Vec::new(),
            log_dir: None,
        }
    }

    /// Require an input.
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a command step.
    pub fn run(self, spec: CommandSpec) -> Self {
        self.step(Step::Run(spec))
    }

    /// Declare an output.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Archive these logs to `dir` after execution.
    pub fn archive_logs<I, S>(mut self, names: I, dir: PathBuf) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs.extend(names.into_iter().map(Into::into));
        self.log_dir = Some(dir);
        self
    }

    /// Commands of this task, in order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.steps.iter().filter_map(|s| match s {
            Step::Run(spec) => Some(spec),
            _ => None,
        })
    }
}

/// Run the steps of a prepared task and verify its outputs.
pub async fn execute_steps(prepared: &PreparedTask, runner: &dyn CommandRunner) -> ExecutionResult {
    if let Err(e) = fs::create_dir_all(&prepared.workdir).await {
        return io_failure(&prepared.workdir, e);
    }
    if let Some(missing) = prepared.inputs.iter().find(|p| !p.exists()) {
        warn!("{}: missing input {}", prepared.node, missing.display());
        return ExecutionResult::failed(FailureReason::MissingInput {
            path: missing.clone(),
        });
    }

    for step in &prepared.steps {
        if let Err(reason) = run_step(step, &prepared.workdir, runner).await {
            warn!("{}: {}", prepared.node, reason);
            return ExecutionResult::failed(reason);
        }
    }

    if let Some(missing) = prepared.outputs.iter().find(|p| !p.exists()) {
        warn!("{}: declared output {} not produced", prepared.node, missing.display());
        return ExecutionResult::failed(FailureReason::MissingOutput {
            path: missing.clone(),
        });
    }
    info!("{} succeeded", prepared.node);
    ExecutionResult::Succeeded {
        outputs: prepared.outputs.clone(),
    }
}

async fn run_step(step: &Step, workdir: &Path, runner: &dyn CommandRunner) -> Result<(), FailureReason> {
    match step {
        Step::Run(spec) => {
            let mut spec = spec.clone();
            if spec.cwd.is_none() {
                spec.cwd = Some(workdir.to_path_buf());
            }
            let command = spec.display();
            info!("Running {}", command);
            let output = runner.run(&spec).await.map_err(|e| match e {
                ToolError::Timeout { .. } => FailureReason::Timeout {
                    command: command.clone(),
                },
                ToolError::Spawn { source, .. } => FailureReason::Spawn {
                    command: command.clone(),
                    message: source.to_string(),
                },
            })?;
            debug!("{} finished in {:?}", command, output.duration);
            if !output.success() {
                return Err(FailureReason::CommandFailed {
                    command,
                    exit_code: output.exit_code,
                    stderr: tail(&output.stderr),
                });
            }
            Ok(())
        }
        Step::WriteFile { path, contents } => {
            ensure_parent(path).await?;
            fs::write(path, contents).await.map_err(|e| io_reason(path, e))
        }
        Step::Copy { from, to } => {
            if !from.exists() {
                return Err(FailureReason::MissingInput { path: from.clone() });
            }
            ensure_parent(to).await?;
            fs::copy(from, to).await.map(|_| ()).map_err(|e| io_reason(to, e))
        }
        Step::RemoveDir(dir) => match fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!("Removed {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_reason(dir, e)),
        },
    }
}

/// Copy the declared logs that exist into the log directory.
pub async fn archive_logs(prepared: &PreparedTask) -> Result<(), TaskError> {
    let Some(dir) = &prepared.log_dir else {
        return Ok(());
    };
    let present: Vec<PathBuf> = prepared
        .logs
        .iter()
        .map(|name| prepared.workdir.join(name))
        .filter(|p| p.exists())
        .collect();
    if present.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).await?;
    for path in present {
        if let Some(name) = path.file_name() {
            fs::copy(&path, dir.join(name)).await?;
            debug!("Archived {} to {}", path.display(), dir.display());
        }
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), FailureReason> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent)
            .await
            .map_err(|e| io_reason(parent, e)),
        None => Ok(()),
    }
}

fn io_reason(path: &Path, e: std::io::Error) -> FailureReason {
    FailureReason::Io {
        message: format!("{}: {}", path.display(), e),
    }
}

fn io_failure(path: &Path, e: std::io::Error) -> ExecutionResult {
    ExecutionResult::failed(io_reason(path, e))
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
