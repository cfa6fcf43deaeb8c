//! Task errors and execution results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use surfexp_config::ConfigError;
use surfexp_core::TaskKind;

/// Errors raised while preparing a task or running its postfix hook.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Configuration problem
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A required input file does not exist
    #[error("Missing input: {0}")]
    MissingInput(PathBuf),

    /// No executable found for a binary
    #[error("Binary {binary} not found, searched {searched:?}")]
    BinaryNotFound {
        /// Binary name, e.g. `OFFLINE`
        binary: String,
        /// Candidate paths
        searched: Vec<PathBuf>,
    },

    /// No implementation registered for a kind
    #[error("No task registered for kind {0}")]
    Unregistered(TaskKind),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// `prepare` rejected the node
    Prepare {
        /// Error message
        message: String,
    },
    /// Input missing at execution time
    MissingInput {
        /// Expected path
        path: PathBuf,
    },
    /// A command exited non-zero
    CommandFailed {
        /// Command line
        command: String,
        /// Exit code
        exit_code: i32,
        /// Tail of standard error
        stderr: String,
    },
    /// A command exceeded its timeout
    Timeout {
        /// Command line
        command: String,
    },
    /// A command could not be started
    Spawn {
        /// Command line
        command: String,
        /// Error message
        message: String,
    },
    /// A declared output was not produced
    MissingOutput {
        /// Expected path
        path: PathBuf,
    },
    /// Filesystem step failed
    Io {
        /// Error message
        message: String,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Prepare { message } => write!(f, "prepare failed: {}", message),
            FailureReason::MissingInput { path } => write!(f, "missing input {}", path.display()),
            FailureReason::CommandFailed { command, exit_code, .. } => {
                write!(f, "`{}` exited with {}", command, exit_code)
            }
            FailureReason::Timeout { command } => write!(f, "`{}` timed out", command),
            FailureReason::Spawn { command, message } => {
                write!(f, "`{}` could not start: {}", command, message)
            }
            FailureReason::MissingOutput { path } => {
                write!(f, "missing output {}", path.display())
            }
            FailureReason::Io { message } => write!(f, "I/O failure: {}", message),
        }
    }
}

/// Outcome of `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Every step ran and all declared outputs exist
    Succeeded {
        /// Produced artifacts
        outputs: Vec<PathBuf>,
    },
    /// The task failed
    Failed {
        /// Why
        reason: FailureReason,
    },
}

impl ExecutionResult {
    /// Failure with a reason.
    pub fn failed(reason: FailureReason) -> Self {
        ExecutionResult::Failed { reason }
    }

    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Succeeded { .. })
    }
}
