//! The batch system seam.

use crate::error::BatchError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use surfexp_core::{NodeId, SchedulerHandle, TaskStatus};

/// One job handed to a batch system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Node the job runs
    pub node: NodeId,
    /// Job name, `<experiment>/<node>` form
    pub name: String,
    /// Command line the job runs
    pub command: Vec<String>,
    /// Handles the job must wait for
    pub dependencies: Vec<SchedulerHandle>,
    /// Resolved node parameters
    pub parameters: BTreeMap<String, String>,
}

/// An external batch or workflow system.
///
/// The system owns execution and enforces completion order through the
/// declared dependencies; callers never submit a job before its dependencies.
#[async_trait]
pub trait BatchSystem: Send + Sync {
    /// Submit a job, returning its handle.
    async fn submit(&self, job: &JobRequest) -> Result<SchedulerHandle, BatchError>;

    /// Kill a job.
    async fn kill(&self, handle: &SchedulerHandle) -> Result<(), BatchError>;

    /// Current status of a job.
    async fn status(&self, handle: &SchedulerHandle) -> Result<TaskStatus, BatchError>;
}
