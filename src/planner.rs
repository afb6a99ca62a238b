use std::path::Path;

use tracing::{debug, info, warn};

use crate::integrity::{hashes_match, md5_sum, IntegrityError};
use crate::models::{EntryKind, ManifestEntry, SkipReason, VerifiedState};

/// Result of reconciling the manifest against the install root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Entries to transfer, in manifest order.
    pub pending: Vec<ManifestEntry>,
    pub skipped: Vec<(ManifestEntry, SkipReason)>,
}

impl Plan {
    pub fn pending_paths(&self) -> Vec<&str> {
        self.pending.iter().map(ManifestEntry::path).collect()
    }
}

/// Computes the pending set for this run.
///
/// Install-once entries whose file exists are never hashed. Tracked entries
/// are skipped only when the verified state has a record, the file is on disk
/// and its current hash still matches that record.
pub async fn plan(
    entries: &[ManifestEntry],
    install_root: &Path,
    state: &VerifiedState,
) -> Result<Plan, IntegrityError> {
    let mut plan = Plan::default();

    for entry in entries {
        if let Some(reason) = skip_reason(entry, install_root, state).await? {
            debug!(path = entry.path(), ?reason, "skipping manifest entry");
            plan.skipped.push((entry.clone(), reason));
        } else {
            plan.pending.push(entry.clone());
        }
    }

    info!(
        pending = plan.pending.len(),
        skipped = plan.skipped.len(),
        "reconciliation finished"
    );
    Ok(plan)
}

async fn skip_reason(
    entry: &ManifestEntry,
    install_root: &Path,
    state: &VerifiedState,
) -> Result<Option<SkipReason>, IntegrityError> {
    let kind = entry.kind();
    if kind == EntryKind::Ignored {
        return Ok(Some(SkipReason::IgnoreMarker));
    }
    if !entry.stays_inside_root() {
        warn!(path = entry.path(), "manifest entry points outside the install root, skipping");
        return Ok(Some(SkipReason::OutsideInstallRoot));
    }

    let local_path = entry.local_path(install_root);
    let exists = tokio::fs::try_exists(&local_path).await?;

    if kind == EntryKind::InstallOnce && exists {
        return Ok(Some(SkipReason::InstallOncePresent));
    }

    let download_path = entry.download_path();
    if let Some(verified) = state.verified_hash(&download_path) {
        if !exists {
            info!(path = entry.path(), "verified file is missing, downloading again");
            return Ok(None);
        }
        let current = md5_sum(&local_path).await?;
        if hashes_match(&current, verified) {
            return Ok(Some(SkipReason::AlreadyVerified));
        }
        info!(path = entry.path(), "file is outdated or corrupt, downloading again");
    }
    Ok(None)
}
