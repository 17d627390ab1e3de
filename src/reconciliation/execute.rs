use super::plan::{PullDecision, PullPlan};
use super::push::{PushKind, PushPlan};
use crate::backup::BackupManager;
use crate::remote::{RemoteWriter, RepoRef};
use crate::utils::{compute_file_hash, file_mtime, remote_profile_path, set_file_mtime, ContentDigest};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A remote profile written over the local copy
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub file_name: String,
    pub digest: ContentDigest,
    pub backup: Option<PathBuf>,
}

/// Result of applying a pull plan
#[derive(Debug, Clone, Default)]
pub struct PullResult {
    pub updated: Vec<AppliedUpdate>,
    pub failed: Vec<String>,
}

impl PullResult {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    pub fn error_count(&self) -> usize {
        self.failed.len()
    }
}

/// Result of applying a push plan
#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub pushed: Vec<String>,
    pub failed: Vec<String>,
}

impl PushResult {
    pub fn attempted(&self) -> usize {
        self.pushed.len() + self.failed.len()
    }

    pub fn success_count(&self) -> usize {
        self.pushed.len()
    }

    pub fn error_count(&self) -> usize {
        self.failed.len()
    }
}

/// Write every `Update` decision over its local file.
///
/// Each file is backed up first when it exists; a failed backup does not
/// stop the update. Per-file failures are counted and the batch continues.
pub async fn apply_pull_plan(plan: &PullPlan, backups: &BackupManager) -> PullResult {
    let mut result = PullResult::default();

    if !plan.has_updates() {
        info!("No profiles to update");
        return result;
    }

    for decision in &plan.to_update {
        match apply_update(decision, backups).await {
            Ok(applied) => {
                info!(file = %decision.file_name, "Updated profile from remote");
                result.updated.push(applied);
            }
            Err(e) => {
                error!(file = %decision.file_name, error = %e, "Failed to update profile");
                result.failed.push(decision.file_name.clone());
            }
        }
    }

    info!(
        updated = result.updated_count(),
        errors = result.error_count(),
        "Applied remote profiles"
    );
    result
}

async fn apply_update(
    decision: &PullDecision,
    backups: &BackupManager,
) -> Result<AppliedUpdate, ExecuteError> {
    let backup = if decision.local.exists() {
        backups.backup(&decision.local).await
    } else {
        None
    };

    let digest = compute_file_hash(&decision.candidate).await?;
    let candidate_mtime = file_mtime(&decision.candidate).await?;

    atomic_copy(&decision.candidate, &decision.local).await?;

    // Keep the local mtime in line with the remote so the next pass agrees
    let mtime = decision.remote_time.unwrap_or(candidate_mtime);
    if let Err(e) = set_file_mtime(&decision.local, mtime).await {
        warn!(file = %decision.file_name, error = %e, "Could not restore modification time");
    }

    Ok(AppliedUpdate {
        file_name: decision.file_name.clone(),
        digest,
        backup,
    })
}

/// Copy `source` next to `dest` under a temporary name, then rename it into place
async fn atomic_copy(source: &Path, dest: &Path) -> Result<(), std::io::Error> {
    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("profile");
    let temp_path = dest.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(e) = fs::copy(source, &temp_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, dest).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

/// Upload every scheduled push. Failures are counted, never retried.
pub async fn apply_push_plan(
    plan: &PushPlan,
    repo: &RepoRef,
    writer: &dyn RemoteWriter,
) -> PushResult {
    let mut result = PushResult::default();

    for candidate in &plan.to_push {
        let framing = match candidate.kind {
            PushKind::New => "new",
            PushKind::Modified => "modified",
        };

        match writer
            .upload(repo, &remote_profile_path(&candidate.file_name), &candidate.path)
            .await
        {
            Ok(()) => {
                info!(file = %candidate.file_name, kind = framing, "Pushed profile");
                result.pushed.push(candidate.file_name.clone());
            }
            Err(e) => {
                error!(file = %candidate.file_name, kind = framing, error = %e, "Failed to push profile");
                result.failed.push(candidate.file_name.clone());
            }
        }
    }

    info!(
        attempted = result.attempted(),
        pushed = result.success_count(),
        errors = result.error_count(),
        "Pushed local changes"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_copy_replaces_and_leaves_no_temp() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("remote.json");
        let dest = temp_dir.path().join("profile1.json");
        fs::write(&source, "new").await.unwrap();
        fs::write(&dest, "old").await.unwrap();

        atomic_copy(&source, &dest).await.unwrap();

        assert_eq!(fs::read_to_string(&dest).await.unwrap(), "new");
        let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        assert_eq!(names, vec!["profile1.json", "remote.json"]);
    }

    #[tokio::test]
    async fn test_atomic_copy_missing_source_fails_cleanly() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("profile1.json");
        fs::write(&dest, "old").await.unwrap();

        let result = atomic_copy(&temp_dir.path().join("missing.json"), &dest).await;
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&dest).await.unwrap(), "old");
    }
}
