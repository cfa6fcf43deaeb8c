//! Task registry and the prepare/execute/postfix driver.

use crate::context::TaskContext;
use crate::declaration::TaskDeclaration;
use crate::error::{ExecutionResult, FailureReason, TaskError};
use crate::surface::{SurfaceTask, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use surfexp_core::{NodeId, TaskKind};
use surfexp_tools::CommandRunner;
use tracing::{error, info, warn};

/// Registry mapping a task kind to its implementation.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskKind, Arc<dyn Task>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Registry with the default stage of every kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in TaskKind::ALL {
            registry.register(SurfaceTask::for_kind(kind));
        }
        registry
    }

    /// Register (or replace) the implementation of a kind.
    pub fn register(&mut self, task: impl Task + 'static) -> &mut Self {
        self.tasks.insert(task.kind(), Arc::new(task));
        self
    }

    /// Look up the implementation of a kind.
    pub fn get(&self, kind: TaskKind) -> Result<Arc<dyn Task>, TaskError> {
        self.tasks.get(&kind).cloned().ok_or(TaskError::Unregistered(kind))
    }

    /// Declaration of a registered kind.
    pub fn declaration(&self, kind: TaskKind) -> Result<TaskDeclaration, TaskError> {
        Ok(self.get(kind)?.declaration())
    }

    /// Registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = TaskKind> + '_ {
        self.tasks.keys().copied()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of running one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Node run
    pub node: NodeId,
    /// Result of `execute` (or of a failed `prepare`)
    pub result: ExecutionResult,
    /// Error reported by `postfix`, if any
    pub postfix_error: Option<String>,
}

/// Prepare, execute and postfix one node.
///
/// Failures of the node are returned in the outcome, never as `Err`; only an
/// unregistered kind is an error. A `postfix` failure is logged and recorded
/// next to the execute result without replacing it.
pub async fn run_task(
    registry: &TaskRegistry,
    ctx: &TaskContext,
    runner: &dyn CommandRunner,
) -> Result<TaskOutcome, TaskError> {
    let task = registry.get(ctx.kind())?;
    info!("Running task {}", ctx.node);

    let prepared = match task.prepare(ctx) {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!("{}: prepare failed: {}", ctx.node, e);
            let reason = match e {
                TaskError::MissingInput(path) => FailureReason::MissingInput { path },
                other => FailureReason::Prepare {
                    message: other.to_string(),
                },
            };
            return Ok(TaskOutcome {
                node: ctx.node,
                result: ExecutionResult::failed(reason),
                postfix_error: None,
            });
        }
    };

    let result = task.execute(&prepared, runner).await;
    let postfix_error = match task.postfix(&prepared, &result).await {
        Ok(()) => None,
        Err(e) => {
            error!("{}: postfix failed: {}", ctx.node, e);
            Some(e.to_string())
        }
    };
    Ok(TaskOutcome {
        node: ctx.node,
        result,
        postfix_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::prepared::PreparedTask;
    use async_trait::async_trait;
    use serde_json::json;
    use surfexp_core::parse_dtg;
    use surfexp_tools::{CommandOutput, CommandSpec, ToolError};

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(&self, _spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
            Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: std::time::Duration::ZERO,
            })
        }
    }

    /// Succeeds on execute, fails on postfix.
    struct FlakyCleanup;

    #[async_trait]
    impl Task for FlakyCleanup {
        fn kind(&self) -> TaskKind {
            TaskKind::PrepareCycle
        }

        fn declaration(&self) -> TaskDeclaration {
            TaskDeclaration::new(TaskKind::PrepareCycle)
        }

        fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
            Ok(PreparedTask::new(ctx.node, ctx.workdir()?))
        }

        async fn postfix(&self, _prepared: &PreparedTask, _result: &ExecutionResult) -> Result<(), TaskError> {
            Err(TaskError::Io(std::io::Error::other("log rotation failed")))
        }
    }

    #[test]
    fn test_unregistered_kind() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.get(TaskKind::Soda),
            Err(TaskError::Unregistered(TaskKind::Soda))
        ));
        assert_eq!(TaskRegistry::with_defaults().kinds().count(), TaskKind::ALL.len());
    }

    #[tokio::test]
    async fn test_postfix_error_does_not_mask_result() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeId::new(TaskKind::PrepareCycle, parse_dtg("2022020100").unwrap(), None);
        let ctx = context(dir.path(), node, json!({}));
        let mut registry = TaskRegistry::new();
        registry.register(FlakyCleanup);

        let outcome = run_task(&registry, &ctx, &NoopRunner).await.unwrap();
        assert!(outcome.result.is_success());
        assert_eq!(outcome.postfix_error.as_deref(), Some("I/O error: log rotation failed"));
    }

    #[tokio::test]
    async fn test_prepare_error_is_a_node_failure() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeId::new(TaskKind::Forecast, parse_dtg("2022020100").unwrap(), None);
        let ctx = context(dir.path(), node, json!({}));
        let outcome = run_task(&TaskRegistry::with_defaults(), &ctx, &NoopRunner).await.unwrap();
        match outcome.result {
            ExecutionResult::Failed { reason: FailureReason::Prepare { message } } => {
                assert!(message.contains("OFFLINE"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
