//! Storage trait abstraction.

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use surfexp_core::{CycleState, NodeId, SchedulerHandle, SuiteDefinition, TaskStatus};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error on write
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted file exists but cannot be decoded
    #[error("Corrupt state file {path}: {reason}")]
    Corrupt {
        /// File path
        path: String,
        /// Decoder message
        reason: String,
    },

    /// Lock could not be taken
    #[error("Lock error: {0}")]
    Lock(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// How a lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers
    Shared,
    /// Single writer
    Exclusive,
}

/// Scoped advisory lock. Released on drop.
#[derive(Debug)]
pub struct StorageLock {
    file: Option<std::fs::File>,
    mode: LockMode,
}

impl StorageLock {
    /// Lock an already opened lock file. Blocks until the lock is granted.
    pub fn acquire(file: std::fs::File, mode: LockMode) -> Result<Self> {
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        }
        .map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(Self {
            file: Some(file),
            mode,
        })
    }

    /// A lock that guards nothing, for backends without shared files.
    pub fn unguarded(mode: LockMode) -> Self {
        Self { file: None, mode }
    }

    /// Mode this lock is held in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

/// Scheduler reference and last observed state of one submitted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRecord {
    /// External reference
    pub handle: SchedulerHandle,

    /// Last status reported by the batch system
    #[serde(default)]
    pub last_status: Option<TaskStatus>,
}

/// Mapping of submitted node identities to scheduler handles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleTable {
    /// Records by node
    pub entries: BTreeMap<NodeId, HandleRecord>,

    /// Submissions that timed out, with the reason. The job may exist in
    /// the batch system, so the node must not be submitted again until the
    /// operator confirms or discards it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unconfirmed: BTreeMap<NodeId, String>,
}

impl HandleTable {
    /// Record a fresh submission. Clears an unconfirmed marker of the node.
    pub fn insert(&mut self, node: NodeId, handle: SchedulerHandle) {
        self.unconfirmed.remove(&node);
        self.entries.insert(
            node,
            HandleRecord {
                handle,
                last_status: None,
            },
        );
    }

    /// Handle of a node.
    pub fn handle(&self, node: &NodeId) -> Option<&SchedulerHandle> {
        self.entries.get(node).map(|r| &r.handle)
    }

    /// Node owning a handle.
    pub fn node_for(&self, handle: &SchedulerHandle) -> Option<NodeId> {
        self.entries
            .iter()
            .find(|(_, r)| &r.handle == handle)
            .map(|(n, _)| *n)
    }

    /// Last known status of a handle.
    pub fn last_status(&self, handle: &SchedulerHandle) -> Option<TaskStatus> {
        self.entries
            .values()
            .find(|r| &r.handle == handle)
            .and_then(|r| r.last_status)
    }

    /// Remember the status reported for a handle.
    pub fn record_status(&mut self, handle: &SchedulerHandle, status: TaskStatus) {
        if let Some(record) = self.entries.values_mut().find(|r| &r.handle == handle) {
            record.last_status = Some(status);
        }
    }

    /// Mark a submission whose outcome is unknown.
    pub fn mark_unconfirmed(&mut self, node: NodeId, reason: impl Into<String>) {
        self.unconfirmed.insert(node, reason.into());
    }

    /// Reason a node's submission is unconfirmed.
    pub fn unconfirmed_reason(&self, node: &NodeId) -> Option<&str> {
        self.unconfirmed.get(node).map(String::as_str)
    }

    /// Drop the unconfirmed marker of a node, returning whether it had one.
    pub fn discard_unconfirmed(&mut self, node: &NodeId) -> bool {
        self.unconfirmed.remove(node).is_some()
    }

    /// Number of submitted nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Storage abstraction for experiment state.
///
/// This trait allows different storage backends to be plugged in. A missing
/// record reads as `None`; a record that exists but cannot be decoded is a
/// [`StorageError::Corrupt`].
#[async_trait]
pub trait Storage: Send + Sync {
    // === Cycle progress ===

    /// Load the persisted cycle state.
    async fn load_progress(&self) -> Result<Option<CycleState>>;

    /// Persist the cycle state atomically.
    async fn save_progress(&self, state: &CycleState) -> Result<()>;

    /// Acquire the progress lock for a read or a read-modify-write.
    async fn lock(&self, mode: LockMode) -> Result<StorageLock>;

    // === Suite ===

    /// Load the last emitted suite.
    async fn load_suite(&self) -> Result<Option<SuiteDefinition>>;

    /// Persist the emitted suite.
    async fn save_suite(&self, suite: &SuiteDefinition) -> Result<()>;

    // === Scheduler handles ===

    /// Load the handle table.
    async fn load_handles(&self) -> Result<HandleTable>;

    /// Persist the handle table.
    async fn save_handles(&self, table: &HandleTable) -> Result<()>;
}
