//! Scheduler handles and task status.

use serde::{Deserialize, Serialize};

/// Opaque reference to one submitted task instance in an external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerHandle(pub String);

impl SchedulerHandle {
    /// Wrap an external job reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw external reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting to run
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with a failure
    Failed,
    /// Killed or never started because a predecessor did not succeed
    Aborted,
}

impl TaskStatus {
    /// Whether the task will not change state any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Aborted)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Aborted => write!(f, "aborted"),
        }
    }
}
