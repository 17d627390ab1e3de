use super::plan::PlanError;
use super::resolve_remote_time;
use crate::config::IgnoreList;
use crate::remote::{last_change_within, GitTimeTable, RemoteTimeOracle, RepoRef};
use crate::snapshot::{list_profile_files, Snapshot};
use crate::utils::{file_digest, remote_profile_path, ContentDigest};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a pushed profile relates to the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// Remote has no history for this path
    New,
    Modified,
}

/// A local profile whose content changed since the snapshot
#[derive(Debug, Clone)]
pub struct PushCandidate {
    pub file_name: String,
    pub path: PathBuf,
    pub digest: ContentDigest,
    pub kind: PushKind,
}

/// A changed profile held back because the remote moved on during the session
#[derive(Debug, Clone)]
pub struct PushConflict {
    pub file_name: String,
    pub path: PathBuf,
    /// Remote time observed during the pull phase
    pub pulled_time: DateTime<Utc>,
    /// Remote time observed just before pushing
    pub remote_time: DateTime<Utc>,
}

/// Result of a push reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct PushPlan {
    pub to_push: Vec<PushCandidate>,
    /// Filenames whose content matches the snapshot
    pub unchanged: Vec<String>,
    pub conflicts: Vec<PushConflict>,
    /// Filenames that could not be hashed now or at snapshot time
    pub errors: Vec<String>,
}

impl PushPlan {
    pub fn has_pushes(&self) -> bool {
        !self.to_push.is_empty()
    }

    pub fn is_pushed(&self, file_name: &str) -> bool {
        self.to_push.iter().any(|c| c.file_name == file_name)
    }

    pub fn is_unchanged(&self, file_name: &str) -> bool {
        self.unchanged.iter().any(|name| name == file_name)
    }
}

/// Inputs shared by every file in a push pass
pub struct PushContext<'a> {
    pub repo: &'a RepoRef,
    pub profiles_dir: &'a Path,
    pub oracle: &'a dyn RemoteTimeOracle,
    pub ignore: &'a IgnoreList,
    pub oracle_timeout: Duration,
    /// Re-query the remote for files with a recorded pull-time entry
    pub conflict_check: bool,
}

/// Classify local profiles against the pre-session snapshot.
///
/// The outcome depends only on content: a file is pushed when it is new or
/// its digest differs from the snapshot. `git_times` carries the pull phase's
/// lookups and is extended with any new ones.
pub async fn build_push_plan(
    ctx: &PushContext<'_>,
    snapshot: &Snapshot,
    git_times: &mut GitTimeTable,
) -> Result<PushPlan, PlanError> {
    let mut plan = PushPlan::default();

    for entry in list_profile_files(ctx.profiles_dir, ctx.ignore)? {
        if snapshot.is_unreadable(&entry.file_name) {
            warn!(file = %entry.file_name, "Content before the session is unknown, not pushing");
            plan.errors.push(entry.file_name);
            continue;
        }

        let Some(digest) = file_digest(&entry.path).await else {
            warn!(file = %entry.file_name, "Could not hash profile, not pushing");
            plan.errors.push(entry.file_name);
            continue;
        };

        if snapshot.is_unchanged(&entry.file_name, &digest) {
            debug!(file = %entry.file_name, "Unchanged since snapshot");
            plan.unchanged.push(entry.file_name);
            continue;
        }

        let pulled_time = git_times.get(&entry.file_name).copied();

        if ctx.conflict_check {
            if let Some(pulled_time) = pulled_time {
                let current = last_change_within(
                    ctx.oracle,
                    ctx.repo,
                    &remote_profile_path(&entry.file_name),
                    ctx.oracle_timeout,
                )
                .await;

                if let Some(remote_time) = current.filter(|t| *t > pulled_time) {
                    warn!(
                        file = %entry.file_name,
                        %pulled_time,
                        %remote_time,
                        "Remote changed during the session, not pushing"
                    );
                    plan.conflicts.push(PushConflict {
                        file_name: entry.file_name,
                        path: entry.path,
                        pulled_time,
                        remote_time,
                    });
                    continue;
                }
            }
        }

        let remote_time = resolve_remote_time(
            ctx.oracle,
            ctx.repo,
            ctx.oracle_timeout,
            &entry.file_name,
            git_times,
        )
        .await;

        let kind = match remote_time {
            Some(_) => PushKind::Modified,
            None => PushKind::New,
        };

        debug!(file = %entry.file_name, ?kind, "Scheduling push");
        plan.to_push.push(PushCandidate {
            file_name: entry.file_name,
            path: entry.path,
            digest,
            kind,
        });
    }

    info!(
        push = plan.to_push.len(),
        unchanged = plan.unchanged.len(),
        conflicts = plan.conflicts.len(),
        errors = plan.errors.len(),
        "Checked local changes"
    );

    Ok(plan)
}
