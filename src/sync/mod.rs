//! Drives one sync cycle around a session.
//!
//! The cycle runs snapshot → pull reconcile → pull apply → session →
//! push reconcile → push apply. Per-file problems only show up in the
//! counts; structural problems and a failed session end the cycle in
//! [`SyncPhase::Failed`].

use crate::backup::BackupManager;
use crate::config::{IgnoreList, SyncConfig};
use crate::reconciliation::{
    apply_pull_plan, apply_push_plan, build_pull_plan, build_push_plan, PlanError, PullContext,
    PullReason, PushContext,
};
use crate::remote::{GitTimeTable, RemoteStore, RepoRef};
use crate::session::{SessionError, SessionOutcome, SessionRunner};
use crate::snapshot::{capture_snapshot, Snapshot, SnapshotError};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),

    #[error("Reconciliation error: {0}")]
    PlanError(#[from] PlanError),

    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),

    #[error("Session ended unsuccessfully (exit code {0:?})")]
    SessionFailed(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    SnapshotTaken,
    PullReconciled,
    PullApplied,
    SessionRunning,
    PushReconciled,
    PushApplied,
    Done,
    Failed,
}

/// Pull phase counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub local_only: usize,
    /// Differing local copies kept because they are newer; queued for push
    pub local_newer: usize,
    /// The remote copies could not be fetched; local files were left alone
    pub fetch_failed: bool,
}

/// Push phase counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub attempted: usize,
    pub pushed: usize,
    pub errors: usize,
    pub unchanged: usize,
    pub conflicts: usize,
}

/// Outcome of one sync cycle
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub phase: SyncPhase,
    pub pull: Option<PullSummary>,
    pub session: Option<SessionOutcome>,
    pub push: Option<PushSummary>,
    pub failure: Option<String>,
}

impl SyncReport {
    fn new() -> Self {
        Self {
            phase: SyncPhase::Idle,
            pull: None,
            session: None,
            push: None,
            failure: None,
        }
    }

    /// Per-file errors across both phases
    pub fn error_count(&self) -> usize {
        self.pull.as_ref().map_or(0, |p| p.errors) + self.push.as_ref().map_or(0, |p| p.errors)
    }

    /// Reached `Done` with no per-file errors
    pub fn is_clean(&self) -> bool {
        self.phase == SyncPhase::Done
            && self.error_count() == 0
            && !self.pull.as_ref().is_some_and(|p| p.fetch_failed)
    }
}

pub struct SyncOrchestrator<'a, R: RemoteStore> {
    config: &'a SyncConfig,
    repo: &'a RepoRef,
    remote: &'a R,
    session: &'a dyn SessionRunner,
    ignore: IgnoreList,
    backups: BackupManager,
    /// Where fetched candidates are staged; the system temp dir when unset
    staging_root: Option<PathBuf>,
}

impl<'a, R: RemoteStore> SyncOrchestrator<'a, R> {
    pub fn new(
        config: &'a SyncConfig,
        repo: &'a RepoRef,
        remote: &'a R,
        session: &'a dyn SessionRunner,
    ) -> Self {
        Self {
            config,
            repo,
            remote,
            session,
            ignore: IgnoreList::default(),
            backups: BackupManager::new(&config.backup_dir, config.backup_keep),
            staging_root: None,
        }
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn with_ignore_list(mut self, ignore: IgnoreList) -> Self {
        self.ignore = ignore;
        self
    }

    /// Run a full cycle. Always returns a report; `phase` is `Done` or `Failed`.
    pub async fn run(&self) -> SyncReport {
        let mut report = SyncReport::new();

        match self.run_phases(&mut report).await {
            Ok(()) => {
                report.phase = SyncPhase::Done;
                info!(errors = report.error_count(), "Sync cycle complete");
            }
            Err(e) => {
                error!(phase = ?report.phase, error = %e, "Sync cycle failed");
                report.phase = SyncPhase::Failed;
                report.failure = Some(e.to_string());
            }
        }

        report
    }

    async fn run_phases(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let mut snapshot = capture_snapshot(&self.config.profiles_dir, &self.ignore).await?;
        report.phase = SyncPhase::SnapshotTaken;

        let mut git_times = GitTimeTable::new();
        let pull = self.pull(&mut snapshot, &mut git_times, report).await?;
        report.pull = Some(pull);
        report.phase = SyncPhase::PullApplied;

        report.phase = SyncPhase::SessionRunning;
        let outcome = self.session.run().await?;
        report.session = Some(outcome);
        if !outcome.success {
            return Err(SyncError::SessionFailed(outcome.exit_code));
        }

        let push_ctx = PushContext {
            repo: self.repo,
            profiles_dir: &self.config.profiles_dir,
            oracle: self.remote,
            ignore: &self.ignore,
            oracle_timeout: self.config.oracle_timeout(),
            conflict_check: self.config.conflict_check,
        };
        let plan = build_push_plan(&push_ctx, &snapshot, &mut git_times).await?;
        report.phase = SyncPhase::PushReconciled;

        let result = apply_push_plan(&plan, self.repo, self.remote).await;
        let summary = PushSummary {
            attempted: result.attempted(),
            pushed: result.success_count(),
            errors: result.error_count() + plan.errors.len(),
            unchanged: plan.unchanged.len(),
            conflicts: plan.conflicts.len(),
        };
        info!(
            pushed = summary.pushed,
            errors = summary.errors,
            unchanged = summary.unchanged,
            conflicts = summary.conflicts,
            "Push phase finished"
        );
        report.push = Some(summary);
        report.phase = SyncPhase::PushApplied;

        Ok(())
    }

    /// Fetch, classify and apply remote profiles.
    ///
    /// Leaves `snapshot` describing the content the session starts from.
    async fn pull(
        &self,
        snapshot: &mut Snapshot,
        git_times: &mut GitTimeTable,
        report: &mut SyncReport,
    ) -> Result<PullSummary, SyncError> {
        let fetch_failed = PullSummary {
            fetch_failed: true,
            ..Default::default()
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("profile-sync-");
        let staging = match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        let staging = match staging {
            Ok(staging) => staging,
            Err(e) => {
                warn!(error = %e, "Could not create staging folder, keeping local copies");
                return Ok(fetch_failed);
            }
        };

        let fetched = match self.remote.fetch_profiles(self.repo, staging.path()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "Could not fetch remote profiles, keeping local copies");
                return Ok(fetch_failed);
            }
        };

        let pull_ctx = PullContext {
            repo: self.repo,
            profiles_dir: &self.config.profiles_dir,
            oracle: self.remote,
            ignore: &self.ignore,
            tolerance: self.config.mtime_tolerance(),
            oracle_timeout: self.config.oracle_timeout(),
            unfetched: &fetched.failed,
        };
        let plan = build_pull_plan(&pull_ctx, &fetched.staged).await?;
        report.phase = SyncPhase::PullReconciled;

        let result = apply_pull_plan(&plan, &self.backups).await;

        for applied in &result.updated {
            snapshot.record(applied.file_name.clone(), applied.digest);
        }
        // Local-only profiles are not on the remote yet; make sure they get pushed
        for name in &plan.local_only {
            snapshot.forget(name);
        }
        // Same for differing local copies that won against the remote
        let local_newer: Vec<&str> = plan
            .to_skip
            .iter()
            .filter(|d| d.reason == PullReason::LocalNewerOrSame)
            .map(|d| d.file_name.as_str())
            .collect();
        for name in &local_newer {
            snapshot.forget(name);
        }
        git_times.extend(plan.git_times.iter().map(|(k, v)| (k.clone(), *v)));

        let summary = PullSummary {
            updated: result.updated_count(),
            skipped: plan.to_skip.len(),
            errors: result.error_count() + fetched.failed.len(),
            local_only: plan.local_only.len(),
            local_newer: local_newer.len(),
            fetch_failed: false,
        };
        info!(
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            local_newer = summary.local_newer,
            "Pull phase finished"
        );
        Ok(summary)
    }
}
