//! Durable adventure persistence.
//!
//! The session layer consumes the [`HistoryStore`] trait; [`FileStore`]
//! is the supplied implementation, keeping one directory per adventure
//! with `state.json`, `history.json` and a `history/` directory of
//! compaction archives. All writes go through a temp-file-then-rename
//! step so a crash never leaves a half-written file behind.

use crate::history::{NarrativeEntry, NarrativeHistory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from store operations, returned as values so callers can
/// pattern-match on the category.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("adventure '{id}' was not found")]
    NotFound { id: String },

    #[error("session token does not match adventure '{id}'")]
    InvalidToken { id: String },

    #[error("saved adventure at {path} is corrupted: {detail}")]
    Corrupted { path: String, detail: String },

    #[error("adventure directory unavailable: {0}")]
    Environment(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-adventure structured state.
///
/// The session layer treats this as opaque apart from identity checks;
/// game-mechanic tools own its evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdventureState {
    pub id: String,
    pub token: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdventureState {
    fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            token: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable per-adventure state and transcript persistence.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a fresh adventure and return its state (including the
    /// session token the client must present on load).
    async fn create(&self, title: &str) -> Result<AdventureState, StoreError>;

    /// Load an adventure, verifying the session token.
    async fn load(
        &self,
        id: &str,
        token: &str,
    ) -> Result<(AdventureState, NarrativeHistory), StoreError>;

    /// Persist state and transcript together.
    async fn save(
        &self,
        state: &AdventureState,
        history: &NarrativeHistory,
    ) -> Result<(), StoreError>;

    /// Append one entry to the stored transcript.
    async fn append_entry(&self, id: &str, entry: &NarrativeEntry) -> Result<(), StoreError>;

    /// Directory where compaction archives for this adventure belong.
    fn archive_dir(&self, id: &str) -> PathBuf;
}

/// File-backed store: one directory per adventure under a root.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at an existing directory.
    ///
    /// Fails with an environment error when the directory is missing,
    /// so a misconfigured deployment is caught at initialization.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Environment(format!(
                "store root '{}' does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn adventure_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.adventure_dir(id).join("state.json")
    }

    fn history_path(&self, id: &str) -> PathBuf {
        self.adventure_dir(id).join("history.json")
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    async fn read_history(&self, id: &str) -> Result<NarrativeHistory, StoreError> {
        let path = self.history_path(id);
        if !path.exists() {
            // A state file without a transcript is a fresh adventure.
            return Ok(NarrativeHistory::new());
        }
        self.read_json(&path).await
    }
}

/// Serialize to a temp file next to the target, then rename into place.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupted {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl HistoryStore for FileStore {
    async fn create(&self, title: &str) -> Result<AdventureState, StoreError> {
        let state = AdventureState::new(title);
        let dir = self.adventure_dir(&state.id);
        fs::create_dir_all(&dir).await?;
        write_json_atomic(&self.state_path(&state.id), &state).await?;
        write_json_atomic(&self.history_path(&state.id), &NarrativeHistory::new()).await?;
        Ok(state)
    }

    async fn load(
        &self,
        id: &str,
        token: &str,
    ) -> Result<(AdventureState, NarrativeHistory), StoreError> {
        let state_path = self.state_path(id);
        if !state_path.exists() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }

        let state: AdventureState = self.read_json(&state_path).await?;
        if state.token != token {
            return Err(StoreError::InvalidToken { id: id.to_string() });
        }

        let history = self.read_history(id).await?;
        Ok((state, history))
    }

    async fn save(
        &self,
        state: &AdventureState,
        history: &NarrativeHistory,
    ) -> Result<(), StoreError> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        write_json_atomic(&self.state_path(&state.id), &state).await?;
        write_json_atomic(&self.history_path(&state.id), history).await?;
        Ok(())
    }

    async fn append_entry(&self, id: &str, entry: &NarrativeEntry) -> Result<(), StoreError> {
        let path = self.history_path(id);
        if !self.adventure_dir(id).is_dir() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let mut history = self.read_history(id).await?;
        history.push(entry.clone());
        write_json_atomic(&path, &history).await
    }

    fn archive_dir(&self, id: &str) -> PathBuf {
        self.adventure_dir(id).join("history")
    }
}
