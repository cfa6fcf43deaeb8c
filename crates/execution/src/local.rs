//! In-process batch system for running without an external scheduler.

use crate::engine::node_context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use surfexp_config::{ConfigStore, ResolvedConfig};
use surfexp_core::{CycleState, SchedulerHandle, TaskStatus};
use surfexp_scheduler::{BatchError, BatchSystem, JobRequest};
use surfexp_tasks::{run_task, TaskOutcome, TaskRegistry};
use surfexp_tools::CommandRunner;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// A job run by the [`LocalBatchSystem`].
#[derive(Debug, Clone)]
pub struct LocalJob {
    /// Final status
    pub status: TaskStatus,
    /// Outcome, when the node ran
    pub outcome: Option<TaskOutcome>,
}

/// Runs every job to completion inside `submit`.
///
/// Jobs are submitted in dependency order, so all dependencies of a job have
/// finished by the time it is submitted. A job with a dependency that did not
/// succeed is recorded as aborted without running.
pub struct LocalBatchSystem {
    store: ConfigStore,
    config: ResolvedConfig,
    progress: CycleState,
    registry: Arc<TaskRegistry>,
    runner: Arc<dyn CommandRunner>,
    jobs: Mutex<BTreeMap<SchedulerHandle, LocalJob>>,
}

impl LocalBatchSystem {
    /// Create a local batch system for one build of the suite.
    pub fn new(
        store: ConfigStore,
        config: ResolvedConfig,
        progress: CycleState,
        registry: Arc<TaskRegistry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            store,
            config,
            progress,
            registry,
            runner,
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed the final status of jobs run by an earlier process, so that
    /// their dependents can run.
    pub fn with_history(mut self, finished: impl IntoIterator<Item = (SchedulerHandle, TaskStatus)>) -> Self {
        let jobs = self.jobs.get_mut();
        for (handle, status) in finished {
            jobs.insert(handle, LocalJob { status, outcome: None });
        }
        self
    }

    /// Jobs run so far.
    pub async fn jobs(&self) -> BTreeMap<SchedulerHandle, LocalJob> {
        self.jobs.lock().await.clone()
    }

    async fn run(&self, job: &JobRequest) -> LocalJob {
        let ctx = match node_context(&self.store, &self.config, &self.progress, job.node) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("{}: cannot build task context: {}", job.node, e);
                return LocalJob {
                    status: TaskStatus::Failed,
                    outcome: None,
                };
            }
        };
        match run_task(&self.registry, &ctx, self.runner.as_ref()).await {
            Ok(outcome) => LocalJob {
                status: if outcome.result.is_success() {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                },
                outcome: Some(outcome),
            },
            Err(e) => {
                error!("{}: {}", job.node, e);
                LocalJob {
                    status: TaskStatus::Failed,
                    outcome: None,
                }
            }
        }
    }
}

#[async_trait]
impl BatchSystem for LocalBatchSystem {
    async fn submit(&self, job: &JobRequest) -> Result<SchedulerHandle, BatchError> {
        let handle = SchedulerHandle::new(format!("local-{}", ulid::Ulid::new()));
        let blocked = {
            let jobs = self.jobs.lock().await;
            job.dependencies
                .iter()
                .find(|dep| jobs.get(*dep).map(|j| j.status) != Some(TaskStatus::Succeeded))
                .cloned()
        };

        let local = match blocked {
            Some(dep) => {
                warn!("{}: dependency {} did not succeed, not running", job.node, dep);
                LocalJob {
                    status: TaskStatus::Aborted,
                    outcome: None,
                }
            }
            None => self.run(job).await,
        };
        info!("{} ({}) {}", job.name, handle, local.status);
        self.jobs.lock().await.insert(handle.clone(), local);
        Ok(handle)
    }

    async fn kill(&self, handle: &SchedulerHandle) -> Result<(), BatchError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(handle)
            .ok_or_else(|| BatchError::UnknownHandle(handle.clone()))?;
        if !job.status.is_terminal() {
            job.status = TaskStatus::Aborted;
        }
        Ok(())
    }

    async fn status(&self, handle: &SchedulerHandle) -> Result<TaskStatus, BatchError> {
        self.jobs
            .lock()
            .await
            .get(handle)
            .map(|j| j.status)
            .ok_or_else(|| BatchError::UnknownHandle(handle.clone()))
    }
}
