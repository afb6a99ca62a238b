// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// How a manifest entry is treated during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Root-level `/-` entries are never downloaded.
    Ignored,
    /// Final segment starts with `+`: seeded once, then owned by the user.
    InstallOnce,
    /// Re-verified by hash on every run.
    Tracked,
}

/// A single slash-rooted path from the manifest, exactly as the server wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    path: String,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The path as it appears in the manifest (and in the hash ledger).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        if self.path.starts_with("/-") {
            EntryKind::Ignored
        } else if self.file_name().starts_with('+') {
            EntryKind::InstallOnce
        } else {
            EntryKind::Tracked
        }
    }

    /// The logical path used for the remote URL and the verified-state key.
    /// For install-once entries the leading `+` of the final segment is dropped.
    pub fn download_path(&self) -> String {
        let (dir, name) = self.split();
        match name.strip_prefix('+') {
            Some(stripped) => format!("{}{}", dir, stripped),
            None => self.path.clone(),
        }
    }

    /// `false` when the path climbs out of the install root (`..`) or names
    /// another root once the leading slash is dropped.
    pub fn stays_inside_root(&self) -> bool {
        let download_path = self.download_path();
        let relative = download_path.trim_start_matches('/');
        !relative.is_empty()
            && Path::new(relative)
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }

    /// Where the entry lives below the install root.
    pub fn local_path(&self, install_root: &Path) -> PathBuf {
        install_root.join(self.download_path().trim_start_matches('/'))
    }

    fn file_name(&self) -> &str {
        self.split().1
    }

    /// Splits into (directory including trailing slash, final segment).
    fn split(&self) -> (&str, &str) {
        match self.path.rfind('/') {
            Some(idx) => self.path.split_at(idx + 1),
            None => ("", self.path.as_str()),
        }
    }
}

/// Durable record of files whose content hash was verified on a previous run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedState {
    /// Logical download path -> last verified hash.
    #[serde(default)]
    pub downloaded_files: HashMap<String, String>,
    /// Kept so older state files round-trip; planning never reads it.
    #[serde(default)]
    pub pending_files: Vec<String>,
}

impl VerifiedState {
    pub fn verified_hash(&self, download_path: &str) -> Option<&str> {
        self.downloaded_files.get(download_path).map(String::as_str)
    }

    pub fn record(&mut self, download_path: impl Into<String>, hash: impl Into<String>) {
        self.downloaded_files.insert(download_path.into(), hash.into());
    }
}

/// Why the planner left a manifest entry out of the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    IgnoreMarker,
    /// The path would resolve outside the install root.
    OutsideInstallRoot,
    InstallOncePresent,
    AlreadyVerified,
}

/// How a file came to be verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedBy {
    /// The file on disk already carried the expected hash; no network access.
    ExistingFile,
    Downloaded { bytes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub hash: String,
    pub by: VerifiedBy,
}

/// Result of a transfer attempt for a pending file. Entries the planner left
/// out are reported with their [`SkipReason`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Verified(Verified),
    Failed(String),
}

/// Byte-level progress of a transfer, either one file or a whole session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ByteProgress {
    pub downloaded: u64,
    /// Declared content length; 0 when the server did not send one.
    pub total: u64,
    pub elapsed: Duration,
}

impl ByteProgress {
    /// Progress as a fraction in range 0.0..=1.0, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f32> {
        if self.total == 0 {
            return None;
        }
        Some(self.downloaded as f32 / self.total as f32)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.downloaded as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Planning,
    Transferring,
    Completed,
    Cancelled,
    Failed,
}

/// Terminal status of a session that ran to the end of its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Cancelled,
}

/// Final aggregate handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub status: SessionStatus,
    /// Size of the pending set computed at planning time.
    pub pending: usize,
    pub verified: usize,
    /// Manifest paths that failed to download or verify.
    pub failed: Vec<String>,
}

impl SessionReport {
    /// `true` when every pending file was verified. A completed session with
    /// failures is still a success for the caller.
    pub fn all_verified(&self) -> bool {
        self.status == SessionStatus::Completed && self.failed.is_empty()
    }
}

/// Notifications emitted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchEvent {
    Phase(SessionPhase),
    Skipped { path: String, reason: SkipReason },
    Planned { pending: usize, skipped: usize },
    DownloadSizeEstimated(u64),
    FileStarted { index: usize, total: usize, path: String },
    /// `progress` covers the current file. `session` counts every byte
    /// received since transfers began; its total is the size estimate, or 0
    /// when none was requested.
    Bytes { path: String, progress: ByteProgress, session: ByteProgress },
    /// `completed` counts finished files, so it runs from 1 to `total`.
    FileFinished { completed: usize, total: usize, path: String, outcome: TransferOutcome },
    StateNotPersisted(String),
}
