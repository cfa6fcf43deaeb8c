//! JSON file storage implementation.
//!
//! Stores the experiment state as JSON files in one directory. Every write
//! goes to a temporary file that is synced and then renamed over the target,
//! so a crash mid-write leaves the previously committed file intact.

use std::path::{Path, PathBuf};
use surfexp_core::{CycleState, SuiteDefinition};
use super::{HandleTable, LockMode, Result, Storage, StorageError, StorageLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// File-based JSON storage backend.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    root: PathBuf,
    stream: Option<u32>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, stream: None })
    }

    /// Storage for one independent progress stream of the experiment.
    pub fn for_stream(mut self, stream: u32) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, stem: &str) -> PathBuf {
        match self.stream {
            Some(n) => self.root.join(format!("{}_stream{}.json", stem, n)),
            None => self.root.join(format!("{}.json", stem)),
        }
    }

    /// Path of the progress file.
    pub fn progress_path(&self) -> PathBuf {
        self.file("progress")
    }

    fn suite_path(&self) -> PathBuf {
        self.file("suite")
    }

    fn handles_path(&self) -> PathBuf {
        self.file("handles")
    }

    fn lock_path(&self) -> PathBuf {
        self.file("progress").with_extension("lock")
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn load_progress(&self) -> Result<Option<CycleState>> {
        read_json(&self.progress_path()).await
    }

    async fn save_progress(&self, state: &CycleState) -> Result<()> {
        write_json_atomic(&self.progress_path(), state).await
    }

    async fn lock(&self, mode: LockMode) -> Result<StorageLock> {
        let path = self.lock_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        debug!("Waiting for {:?} lock on {}", mode, path.display());
        tokio::task::spawn_blocking(move || StorageLock::acquire(file, mode))
            .await
            .map_err(|e| StorageError::Lock(e.to_string()))?
    }

    async fn load_suite(&self) -> Result<Option<SuiteDefinition>> {
        read_json(&self.suite_path()).await
    }

    async fn save_suite(&self, suite: &SuiteDefinition) -> Result<()> {
        write_json_atomic(&self.suite_path(), suite).await
    }

    async fn load_handles(&self) -> Result<HandleTable> {
        Ok(read_json(&self.handles_path()).await?.unwrap_or_default())
    }

    async fn save_handles(&self, table: &HandleTable) -> Result<()> {
        write_json_atomic(&self.handles_path(), table).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    debug!("Wrote {}", path.display());
    Ok(())
}
