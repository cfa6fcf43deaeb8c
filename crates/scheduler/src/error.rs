//! Scheduler errors.

use std::time::Duration;
use surfexp_core::{NodeId, SchedulerHandle, SuiteGraphError};
use surfexp_storage::StorageError;

/// A scheduler command is missing an identifying field or has a malformed one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    /// Required field absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Field present but malformed
    #[error("Invalid {field} '{value}': {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw value
        value: String,
        /// What was wrong
        reason: String,
    },

    /// Not a `key=value` pair or an unknown key
    #[error("Unrecognised argument: {0}")]
    Unrecognised(String),

    /// Operation other than kill or status
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

/// Errors reported by a batch system.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The batch system could not be reached or gave an unusable reply
    #[error("Scheduler communication failed: {0}")]
    Communication(String),

    /// No reply within the time limit; the outcome is unknown
    #[error("Scheduler call timed out after {0:?}")]
    Timeout(Duration),

    /// The batch system refused the request
    #[error("Scheduler rejected the request: {0}")]
    Rejected(String),

    /// The handle is not known to the batch system
    #[error("Unknown scheduler handle: {0}")]
    UnknownHandle(SchedulerHandle),
}

impl BatchError {
    /// Whether a retry with the same request is safe and may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BatchError::Communication(_) | BatchError::Timeout(_))
    }
}

/// Errors raised by the scheduler gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Batch system error after retries
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Handle table could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Suite graph is inconsistent
    #[error("Suite graph error: {0}")]
    Graph(#[from] SuiteGraphError),

    /// Malformed command
    #[error(transparent)]
    Parse(#[from] CommandParseError),

    /// No handle recorded for a node
    #[error("Node {0} has not been submitted")]
    NotSubmitted(NodeId),

    /// Node has no unconfirmed submission to resolve
    #[error("Node {0} has no unconfirmed submission")]
    NotUnconfirmed(NodeId),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
