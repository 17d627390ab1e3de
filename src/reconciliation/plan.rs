use super::resolve_remote_time;
use crate::config::IgnoreList;
use crate::remote::{GitTimeTable, RemoteTimeOracle, RepoRef};
use crate::snapshot::list_profile_files;
use crate::utils::{file_digest, file_mtime, file_name_of, is_profile_file_name};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cannot create profile directory {}: {source}", .path.display())]
    ProfileDirError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What happens to the local copy of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullAction {
    /// Remote copy replaces the local one
    Update,
    /// Local copy stays
    Skip,
}

/// Why a pull decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullReason {
    MissingLocal,
    IdenticalContent,
    RemoteNewer,
    LocalNewerOrSame,
}

/// Classification of one remote candidate
#[derive(Debug, Clone)]
pub struct PullDecision {
    pub file_name: String,
    /// Staged remote copy
    pub candidate: PathBuf,
    /// Local file it would replace
    pub local: PathBuf,
    pub action: PullAction,
    pub reason: PullReason,
    /// Remote commit time, if the oracle resolved it
    pub remote_time: Option<DateTime<Utc>>,
}

/// Result of a pull reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct PullPlan {
    pub to_update: Vec<PullDecision>,
    pub to_skip: Vec<PullDecision>,
    /// Local profiles with no remote counterpart
    pub local_only: Vec<String>,
    pub git_times: GitTimeTable,
}

impl PullPlan {
    pub fn has_updates(&self) -> bool {
        !self.to_update.is_empty()
    }

    /// Number of classified candidates
    pub fn len(&self) -> usize {
        self.to_update.len() + self.to_skip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the decision for a filename
    pub fn decision(&self, file_name: &str) -> Option<&PullDecision> {
        self.to_update
            .iter()
            .chain(self.to_skip.iter())
            .find(|d| d.file_name == file_name)
    }
}

/// Inputs shared by every candidate in a pull pass
pub struct PullContext<'a> {
    pub repo: &'a RepoRef,
    pub profiles_dir: &'a Path,
    pub oracle: &'a dyn RemoteTimeOracle,
    pub ignore: &'a IgnoreList,
    /// Remote must be newer than local by more than this to win
    pub tolerance: chrono::Duration,
    pub oracle_timeout: Duration,
    /// Remote profiles that were listed but could not be staged
    pub unfetched: &'a [String],
}

/// Classify staged remote candidates against the local profile directory
pub async fn build_pull_plan(
    ctx: &PullContext<'_>,
    candidates: &[PathBuf],
) -> Result<PullPlan, PlanError> {
    fs::create_dir_all(ctx.profiles_dir)
        .await
        .map_err(|source| PlanError::ProfileDirError {
            path: ctx.profiles_dir.to_path_buf(),
            source,
        })?;

    let candidates = collect_candidates(candidates, ctx.ignore);
    let mut plan = PullPlan::default();

    for (file_name, candidate) in &candidates {
        let local = ctx.profiles_dir.join(file_name);
        let (action, reason, remote_time) =
            classify(ctx, file_name, candidate, &local, &mut plan.git_times).await;

        debug!(file = %file_name, ?action, ?reason, "Pull decision");

        let decision = PullDecision {
            file_name: file_name.clone(),
            candidate: candidate.clone(),
            local,
            action,
            reason,
            remote_time,
        };

        match action {
            PullAction::Update => plan.to_update.push(decision),
            PullAction::Skip => plan.to_skip.push(decision),
        }
    }

    plan.local_only = list_profile_files(ctx.profiles_dir, ctx.ignore)?
        .into_iter()
        .map(|entry| entry.file_name)
        .filter(|name| !candidates.contains_key(name))
        .filter(|name| !ctx.unfetched.contains(name))
        .collect();

    info!(
        update = plan.to_update.len(),
        skip = plan.to_skip.len(),
        local_only = plan.local_only.len(),
        "Compared remote profiles"
    );

    Ok(plan)
}

/// Keep profile-named, non-ignored candidates, keyed and ordered by filename
fn collect_candidates(candidates: &[PathBuf], ignore: &IgnoreList) -> BTreeMap<String, PathBuf> {
    let mut by_name = BTreeMap::new();

    for path in candidates {
        let Some(file_name) = file_name_of(path) else {
            continue;
        };

        if !is_profile_file_name(&file_name) || ignore.is_ignored(&file_name) {
            debug!(file = %file_name, "Excluding remote candidate");
            continue;
        }

        if by_name.contains_key(&file_name) {
            warn!(file = %file_name, "Duplicate remote candidate, keeping the first");
            continue;
        }

        by_name.insert(file_name, path.clone());
    }

    by_name
}

async fn classify(
    ctx: &PullContext<'_>,
    file_name: &str,
    candidate: &Path,
    local: &Path,
    git_times: &mut GitTimeTable,
) -> (PullAction, PullReason, Option<DateTime<Utc>>) {
    if !local.exists() {
        let remote_time =
            resolve_remote_time(ctx.oracle, ctx.repo, ctx.oracle_timeout, file_name, git_times)
                .await;
        return (PullAction::Update, PullReason::MissingLocal, remote_time);
    }

    let remote_digest = file_digest(candidate).await;
    let local_digest = file_digest(local).await;
    if remote_digest.is_some() && remote_digest == local_digest {
        return (PullAction::Skip, PullReason::IdenticalContent, None);
    }

    let remote_time =
        resolve_remote_time(ctx.oracle, ctx.repo, ctx.oracle_timeout, file_name, git_times).await;

    let effective_remote = match remote_time {
        Some(time) => Some(time),
        None => {
            debug!(file = %file_name, "Using staged file time as remote time");
            file_mtime(candidate).await.ok()
        }
    };

    let local_mtime = file_mtime(local).await.ok();

    match (effective_remote, local_mtime) {
        (Some(remote), Some(local_time)) if remote_wins(remote, local_time, ctx.tolerance) => {
            (PullAction::Update, PullReason::RemoteNewer, remote_time)
        }
        (Some(_), Some(_)) => (PullAction::Skip, PullReason::LocalNewerOrSame, remote_time),
        _ => {
            warn!(file = %file_name, "Missing timestamps, keeping local copy");
            (PullAction::Skip, PullReason::LocalNewerOrSame, remote_time)
        }
    }
}

/// Remote wins only when newer than local by more than `tolerance`.
///
/// A margin that pushes the local time past the representable range keeps
/// the local copy.
fn remote_wins(
    remote: DateTime<Utc>,
    local: DateTime<Utc>,
    tolerance: chrono::Duration,
) -> bool {
    match local.checked_add_signed(tolerance) {
        Some(threshold) => remote > threshold,
        None => false,
    }
}
