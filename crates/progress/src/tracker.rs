//! Progress tracking service.

use chrono::Duration;
use std::sync::Arc;
use surfexp_core::{format_dtg, CycleState, Dtg, ProgressStatus};
use surfexp_storage::{LockMode, Storage, StorageError};
use tracing::{debug, info, warn};

/// Result type for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors of the cycle state machine.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// No usable persisted state; recover with [`ProgressTracker::reset`]
    #[error("Progress not found: {0}")]
    NotFound(String),

    /// Advance rejected
    #[error("Invalid advance: {0}")]
    InvalidAdvance(String),

    /// Window with begin not before end
    #[error("Invalid cycle window: begin {begin} is not before end {end}")]
    InvalidWindow {
        /// Requested begin
        begin: String,
        /// Requested end
        end: String,
    },

    /// `initialize` on an experiment that already has state
    #[error("Progress already initialized (last processed {0})")]
    AlreadyInitialized(String),

    /// Storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Persisted cycle state machine of one experiment (stream).
///
/// Every mutation takes the exclusive storage lock for the whole
/// read-modify-write and persists before returning.
pub struct ProgressTracker<S: Storage + ?Sized> {
    storage: Arc<S>,
}

impl<S: Storage + ?Sized> Clone for ProgressTracker<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage + ?Sized> ProgressTracker<S> {
    /// Create a tracker over a storage backend.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// UNINITIALIZED -> ACTIVE with `last_processed = begin`.
    pub async fn initialize(&self, begin: Dtg, end: Dtg) -> Result<CycleState> {
        check_window(begin, end)?;
        let _lock = self.storage.lock(LockMode::Exclusive).await?;
        match self.storage.load_progress().await {
            Ok(Some(existing)) => {
                return Err(ProgressError::AlreadyInitialized(format_dtg(
                    &existing.last_processed,
                )))
            }
            Ok(None) => {}
            Err(StorageError::Corrupt { path, .. }) => {
                warn!("Ignoring corrupt progress file {} on initialize", path);
                return Err(ProgressError::NotFound(format!(
                    "{} is corrupt, use reset to re-initialise",
                    path
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let state = CycleState::new(begin, end);
        self.storage.save_progress(&state).await?;
        info!(
            "Initialized progress {} -> {}",
            format_dtg(&begin),
            format_dtg(&end)
        );
        Ok(state)
    }

    /// Explicit re-initialisation, overwriting whatever is persisted.
    pub async fn reset(&self, begin: Dtg, end: Dtg) -> Result<CycleState> {
        check_window(begin, end)?;
        let _lock = self.storage.lock(LockMode::Exclusive).await?;
        let state = CycleState::new(begin, end);
        self.storage.save_progress(&state).await?;
        warn!("Progress reset to {}", format_dtg(&begin));
        Ok(state)
    }

    /// Read the persisted state under a shared lock.
    pub async fn load(&self) -> Result<CycleState> {
        let _lock = self.storage.lock(LockMode::Shared).await?;
        self.read().await
    }

    /// Write a state under the exclusive lock.
    ///
    /// The state must keep the persisted window and may not move
    /// `last_processed` backwards; use [`ProgressTracker::reset`] to rewind.
    pub async fn save(&self, state: &CycleState) -> Result<()> {
        if !state.is_consistent() {
            return Err(ProgressError::InvalidAdvance(format!(
                "inconsistent state: begin {} last {} end {}",
                format_dtg(&state.begin),
                format_dtg(&state.last_processed),
                format_dtg(&state.end)
            )));
        }
        let _lock = self.storage.lock(LockMode::Exclusive).await?;
        let persisted = self.read().await?;
        if persisted.begin != state.begin || persisted.end != state.end {
            return Err(ProgressError::InvalidAdvance(format!(
                "window {} -> {} differs from the persisted {} -> {}",
                format_dtg(&state.begin),
                format_dtg(&state.end),
                format_dtg(&persisted.begin),
                format_dtg(&persisted.end)
            )));
        }
        if state.last_processed < persisted.last_processed {
            return Err(ProgressError::InvalidAdvance(format!(
                "{} would rewind from {}",
                format_dtg(&state.last_processed),
                format_dtg(&persisted.last_processed)
            )));
        }
        self.storage.save_progress(state).await?;
        debug!("Saved progress at {}", format_dtg(&state.last_processed));
        Ok(())
    }

    /// Move `last_processed` forward by `increment` and persist it.
    ///
    /// Reaching `end` exactly completes the experiment; going past it is
    /// rejected and leaves the persisted state untouched.
    pub async fn advance(&self, increment: Duration) -> Result<CycleState> {
        if increment <= Duration::zero() {
            return Err(ProgressError::InvalidAdvance(format!(
                "increment must be positive, got {}s",
                increment.num_seconds()
            )));
        }
        let _lock = self.storage.lock(LockMode::Exclusive).await?;
        let mut state = self.read().await?;
        let next = state.last_processed + increment;
        if next > state.end {
            return Err(ProgressError::InvalidAdvance(format!(
                "{} is past the end {}",
                format_dtg(&next),
                format_dtg(&state.end)
            )));
        }
        state.last_processed = next;
        self.storage.save_progress(&state).await?;
        info!(
            "Advanced progress to {} ({:?})",
            format_dtg(&next),
            state.status()
        );
        Ok(state)
    }

    /// Current lifecycle status; a missing file is UNINITIALIZED.
    pub async fn status(&self) -> Result<ProgressStatus> {
        let _lock = self.storage.lock(LockMode::Shared).await?;
        match self.storage.load_progress().await {
            Ok(Some(state)) => Ok(state.status()),
            Ok(None) => Ok(ProgressStatus::Uninitialized),
            Err(e) => Err(not_found(e)),
        }
    }

    async fn read(&self) -> Result<CycleState> {
        let state = match self.storage.load_progress().await {
            Ok(Some(state)) => state,
            Ok(None) => {
                return Err(ProgressError::NotFound(
                    "no persisted cycle state, initialise first".to_string(),
                ))
            }
            Err(e) => return Err(not_found(e)),
        };
        if !state.is_consistent() {
            return Err(ProgressError::NotFound(
                "persisted cycle state violates begin <= last <= end".to_string(),
            ));
        }
        Ok(state)
    }
}

fn not_found(e: StorageError) -> ProgressError {
    match e {
        StorageError::Corrupt { path, reason } => {
            ProgressError::NotFound(format!("{} is corrupt: {}", path, reason))
        }
        other => other.into(),
    }
}

fn check_window(begin: Dtg, end: Dtg) -> Result<()> {
    if begin >= end {
        return Err(ProgressError::InvalidWindow {
            begin: format_dtg(&begin),
            end: format_dtg(&end),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surfexp_core::parse_dtg;
    use surfexp_storage::JsonStorage;

    async fn tracker(dir: &std::path::Path) -> ProgressTracker<JsonStorage> {
        ProgressTracker::new(Arc::new(JsonStorage::new(dir).await.unwrap()))
    }

    fn dtg(s: &str) -> Dtg {
        parse_dtg(s).unwrap()
    }

    #[tokio::test]
    async fn test_single_cycle_completes() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        assert_eq!(t.status().await.unwrap(), ProgressStatus::Uninitialized);

        t.initialize(dtg("2022020100"), dtg("2022020103")).await.unwrap();
        assert_eq!(t.status().await.unwrap(), ProgressStatus::Active);

        let state = t.advance(Duration::hours(3)).await.unwrap();
        assert_eq!(state.last_processed, dtg("2022020103"));
        assert_eq!(t.status().await.unwrap(), ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_advance_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        assert!(matches!(
            t.advance(Duration::hours(3)).await,
            Err(ProgressError::NotFound(_))
        ));

        t.initialize(dtg("2022020100"), dtg("2022020106")).await.unwrap();
        assert!(matches!(
            t.advance(Duration::zero()).await,
            Err(ProgressError::InvalidAdvance(_))
        ));
        assert!(matches!(
            t.advance(Duration::hours(-3)).await,
            Err(ProgressError::InvalidAdvance(_))
        ));
        assert!(matches!(
            t.advance(Duration::hours(9)).await,
            Err(ProgressError::InvalidAdvance(_))
        ));
        assert_eq!(t.load().await.unwrap().last_processed, dtg("2022020100"));
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        t.initialize(dtg("2022020100"), dtg("2022020200")).await.unwrap();
        let mut last = t.load().await.unwrap().last_processed;
        while t.status().await.unwrap() == ProgressStatus::Active {
            let state = t.advance(Duration::hours(6)).await.unwrap();
            assert!(state.last_processed > last);
            assert!(state.last_processed <= state.end);
            last = state.last_processed;
        }
        assert_eq!(last, dtg("2022020200"));
        assert!(t.advance(Duration::hours(6)).await.is_err());
    }

    #[tokio::test]
    async fn test_save_never_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        let mut state = CycleState::new(dtg("2022020100"), dtg("2022020106"));
        assert!(matches!(t.save(&state).await, Err(ProgressError::NotFound(_))));

        t.initialize(dtg("2022020100"), dtg("2022020106")).await.unwrap();
        state.last_processed = dtg("2022020103");
        t.save(&state).await.unwrap();
        assert_eq!(t.load().await.unwrap().last_processed, dtg("2022020103"));

        state.last_processed = dtg("2022020100");
        assert!(matches!(t.save(&state).await, Err(ProgressError::InvalidAdvance(_))));
        let other_window = CycleState {
            end: dtg("2022020112"),
            ..t.load().await.unwrap()
        };
        assert!(matches!(t.save(&other_window).await, Err(ProgressError::InvalidAdvance(_))));
        assert_eq!(t.load().await.unwrap().last_processed, dtg("2022020103"));

        t.reset(dtg("2022020100"), dtg("2022020106")).await.unwrap();
        assert_eq!(t.load().await.unwrap().last_processed, dtg("2022020100"));
    }

    #[tokio::test]
    async fn test_initialize_twice_and_invalid_window() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        assert!(matches!(
            t.initialize(dtg("2022020103"), dtg("2022020100")).await,
            Err(ProgressError::InvalidWindow { .. })
        ));
        t.initialize(dtg("2022020100"), dtg("2022020103")).await.unwrap();
        assert!(matches!(
            t.initialize(dtg("2022020100"), dtg("2022020103")).await,
            Err(ProgressError::AlreadyInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_interrupted_save_keeps_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        t.initialize(dtg("2022020100"), dtg("2022020106")).await.unwrap();
        t.advance(Duration::hours(3)).await.unwrap();

        // A crash after writing half of the temporary file, before the rename.
        tokio::fs::write(dir.path().join("progress.json.tmp"), b"{\"begin\":\"2022-")
            .await
            .unwrap();

        let state = t.load().await.unwrap();
        assert_eq!(state.last_processed, dtg("2022020103"));
        let state = t.advance(Duration::hours(3)).await.unwrap();
        assert_eq!(state.status(), ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_corrupt_file_needs_reset() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path()).await;
        tokio::fs::write(dir.path().join("progress.json"), b"garbage")
            .await
            .unwrap();
        assert!(matches!(t.load().await, Err(ProgressError::NotFound(_))));
        assert!(matches!(
            t.initialize(dtg("2022020100"), dtg("2022020103")).await,
            Err(ProgressError::NotFound(_))
        ));

        t.reset(dtg("2022020100"), dtg("2022020103")).await.unwrap();
        assert_eq!(t.load().await.unwrap().last_processed, dtg("2022020100"));
    }
}
