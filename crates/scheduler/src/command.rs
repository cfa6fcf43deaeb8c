//! Batch system driven by configurable command templates.

use crate::batch::{BatchSystem, JobRequest};
use crate::error::BatchError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use surfexp_config::{ConfigError, ResolvedConfig};
use surfexp_core::{SchedulerHandle, TaskStatus};
use surfexp_tools::{CommandOutput, CommandRunner, CommandSpec, ToolError};
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Command templates of an external batch system (`scheduler.*`).
///
/// Arguments may contain `{name}`, `{dependencies}`, `{command}` and
/// `{handle}`. An argument mentioning `{dependencies}` is left out when the
/// job has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    /// Submit command; its reply's first token is the handle
    pub submit: Vec<String>,
    /// Kill command
    pub kill: Vec<String>,
    /// Status command; its reply's first token is the state word
    pub status: Vec<String>,
    /// Joins dependency handles
    pub dependency_separator: String,
    /// External state word to status, matched case-insensitively
    pub states: BTreeMap<String, TaskStatus>,
    /// Limit for every call
    pub timeout: Duration,
}

impl CommandTemplates {
    /// Read the templates from the `scheduler` section.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        let list = |key: &str| -> Result<Vec<String>, ConfigError> {
            let value: Vec<String> = config.get_as(key)?;
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "empty command".to_string(),
                });
            }
            Ok(value)
        };
        let timeout = if config.contains("scheduler.timeout") {
            config
                .get_duration("scheduler.timeout")?
                .to_std()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "scheduler.timeout".to_string(),
                    reason: e.to_string(),
                })?
        } else {
            DEFAULT_TIMEOUT
        };
        let states: BTreeMap<String, TaskStatus> = config.get_opt("scheduler.states")?.unwrap_or_default();
        Ok(Self {
            submit: list("scheduler.submit")?,
            kill: list("scheduler.kill")?,
            status: list("scheduler.status")?,
            dependency_separator: config
                .get_opt("scheduler.dependency_separator")?
                .unwrap_or_else(|| ":".to_string()),
            states: states.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect(),
            timeout,
        })
    }
}

/// A [`BatchSystem`] that runs external commands.
pub struct CommandBatchSystem {
    templates: CommandTemplates,
    runner: Arc<dyn CommandRunner>,
}

impl CommandBatchSystem {
    /// Create a batch system over a command runner.
    pub fn new(templates: CommandTemplates, runner: Arc<dyn CommandRunner>) -> Self {
        Self { templates, runner }
    }

    fn render(&self, template: &[String], vars: &BTreeMap<&str, String>, has_deps: bool) -> Option<CommandSpec> {
        let mut args = template.iter().filter(|arg| has_deps || !arg.contains("{dependencies}")).map(|arg| {
            vars.iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(&format!("{{{}}}", key), value))
        });
        let program = args.next()?;
        Some(CommandSpec::new(program).args(args).timeout(self.templates.timeout))
    }

    async fn call(&self, spec: CommandSpec) -> Result<CommandOutput, BatchError> {
        debug!("Scheduler call: {}", spec.display());
        self.runner.run(&spec).await.map_err(|e| match e {
            ToolError::Timeout { after, .. } => BatchError::Timeout(after),
            ToolError::Spawn { program, source } => {
                BatchError::Communication(format!("{}: {}", program, source))
            }
        })
    }
}

fn first_token(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

#[async_trait]
impl BatchSystem for CommandBatchSystem {
    async fn submit(&self, job: &JobRequest) -> Result<SchedulerHandle, BatchError> {
        let deps: Vec<&str> = job.dependencies.iter().map(SchedulerHandle::as_str).collect();
        let vars = BTreeMap::from([
            ("name", job.name.clone()),
            ("dependencies", deps.join(&self.templates.dependency_separator)),
            ("command", job.command.join(" ")),
        ]);
        let spec = self
            .render(&self.templates.submit, &vars, !deps.is_empty())
            .ok_or_else(|| BatchError::Rejected("empty submit command".to_string()))?;
        let output = self.call(spec).await?;
        if !output.success() {
            return Err(BatchError::Rejected(output.stderr.trim().to_string()));
        }
        let handle = first_token(&output.stdout)
            .map(SchedulerHandle::new)
            .ok_or_else(|| BatchError::Communication("empty submit reply".to_string()))?;
        info!("Submitted {} as {}", job.name, handle);
        Ok(handle)
    }

    async fn kill(&self, handle: &SchedulerHandle) -> Result<(), BatchError> {
        let vars = BTreeMap::from([("handle", handle.to_string())]);
        let spec = self
            .render(&self.templates.kill, &vars, false)
            .ok_or_else(|| BatchError::Rejected("empty kill command".to_string()))?;
        let output = self.call(spec).await?;
        if !output.success() {
            return Err(BatchError::Communication(output.stderr.trim().to_string()));
        }
        Ok(())
    }

    async fn status(&self, handle: &SchedulerHandle) -> Result<TaskStatus, BatchError> {
        let vars = BTreeMap::from([("handle", handle.to_string())]);
        let spec = self
            .render(&self.templates.status, &vars, false)
            .ok_or_else(|| BatchError::Rejected("empty status command".to_string()))?;
        let output = self.call(spec).await?;
        if !output.success() {
            return Err(BatchError::Communication(output.stderr.trim().to_string()));
        }
        let Some(word) = first_token(&output.stdout) else {
            return Err(BatchError::UnknownHandle(handle.clone()));
        };
        match self.templates.states.get(&word.to_lowercase()) {
            Some(status) => Ok(*status),
            None => {
                warn!("Unrecognised state '{}' for {}", word, handle);
                Err(BatchError::Communication(format!("unrecognised state '{}'", word)))
            }
        }
    }
}
