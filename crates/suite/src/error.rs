//! Suite build errors.

use surfexp_config::ConfigError;
use surfexp_core::{SuiteGraphError, TaskKind};
use surfexp_tasks::TaskError;

/// Result type for suite building.
pub type Result<T> = std::result::Result<T, SuiteBuildError>;

/// Errors that abort a suite build before anything is submitted.
#[derive(Debug, thiserror::Error)]
pub enum SuiteBuildError {
    /// An enabled kind requires a kind the pipeline disables
    #[error("Task {kind} requires {predecessor}, which is not enabled")]
    DisabledPredecessor {
        /// Dependent kind
        kind: TaskKind,
        /// Disabled predecessor kind
        predecessor: TaskKind,
    },

    /// Pipeline names a kind nobody implements
    #[error("Unknown task kind in pipeline: {0}")]
    UnknownKind(String),

    /// Same-cycle declarations form a loop
    #[error("Pipeline declarations form a cycle between {0:?}")]
    PipelineCycle(Vec<TaskKind>),

    /// Configuration problem
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task registry problem
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Graph would become inconsistent
    #[error("Suite graph error: {0}")]
    Graph(#[from] SuiteGraphError),

    /// No cycle left to build
    #[error("Experiment completed at {0}")]
    ExperimentCompleted(String),
}
