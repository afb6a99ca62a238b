// src/state_manager.rs

use crate::models::VerifiedState;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no home directory to keep the state file in")]
    NoHomeDirectory,
}

/// Manages the persistence of the verified-file record to a JSON file.
#[derive(Debug, Clone)]
pub struct StateManager {
    path: PathBuf,
}

impl StateManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.epic_shard_launcher/state.json`
    pub fn default_location() -> Result<Self, StateError> {
        let dir = crate::config::launcher_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(Self::new(dir.join("state.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the last persisted state.
    ///
    /// A missing file is the normal first-run case and yields an empty state.
    /// An unreadable or corrupt file is logged and also yields an empty state,
    /// which at worst re-verifies files that were already good.
    pub async fn load(&self) -> VerifiedState {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return VerifiedState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file unreadable, starting empty");
                return VerifiedState::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file corrupt, starting empty");
                VerifiedState::default()
            }
        }
    }

    /// Writes the whole state next to the target and renames it into place,
    /// so a reader sees either the old or the new record.
    pub async fn persist(&self, state: &VerifiedState) -> Result<(), StateError> {
        let data = serde_json::to_vec(state)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temporary_path();
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn temporary_path(&self) -> PathBuf {
        let path_str = self.path.to_string_lossy();
        PathBuf::from(format!("{}.tmp", path_str))
    }
}
