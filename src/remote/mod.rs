//! Seams to the remote content store.
//!
//! The reconciliation engine only talks to the remote through the traits in
//! this module, so tests can substitute in-memory stores.

mod github;

pub use github::GitHubClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Remote last-change timestamps keyed by profile filename
pub type GitTimeTable = BTreeMap<String, DateTime<Utc>>;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("GitHub returned status {status}: {message}")]
    StatusError { status: u16, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid API URL: {0}")]
    InvalidApiUrl(String),
}

static REPO_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://(?:www\.)?github\.com/|git@github\.com:)?([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$",
    )
    .expect("repository URL pattern is valid")
});

/// Owner/repository pair identifying the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse `https://github.com/owner/repo(.git)`, `git@github.com:owner/repo.git`
    /// or a bare `owner/repo`.
    pub fn parse(url: &str) -> Result<Self, RemoteError> {
        let trimmed = url.trim();
        let caps = REPO_URL_RE
            .captures(trimmed)
            .ok_or_else(|| RemoteError::InvalidRepoUrl(url.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// When was a remote path last changed.
///
/// Implementations must never fail past this boundary: any transport or
/// parse problem is reported as `None`.
#[async_trait]
pub trait RemoteTimeOracle: Send + Sync {
    async fn last_change_time(&self, repo: &RepoRef, remote_path: &str) -> Option<DateTime<Utc>>;
}

/// Remote profiles staged by a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedProfiles {
    /// Staged copies, named exactly as on the remote
    pub staged: Vec<PathBuf>,
    /// Profiles listed on the remote whose download failed
    pub failed: Vec<String>,
}

/// Stages remote profile copies in a local directory
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Download every remote profile into `dest_dir`, keeping the exact filenames.
    ///
    /// A profile that is listed but cannot be downloaded is reported in
    /// `failed` rather than left out.
    async fn fetch_profiles(
        &self,
        repo: &RepoRef,
        dest_dir: &Path,
    ) -> Result<FetchedProfiles, RemoteError>;
}

/// Writes a local file to the remote store. Not retried by callers.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn upload(
        &self,
        repo: &RepoRef,
        remote_path: &str,
        local_file: &Path,
    ) -> Result<(), RemoteError>;
}

/// Everything the orchestrator needs from the remote side
pub trait RemoteStore: RemoteTimeOracle + RemoteFetcher + RemoteWriter {}

impl<T: RemoteTimeOracle + RemoteFetcher + RemoteWriter> RemoteStore for T {}

/// Query the oracle, giving up after `timeout`
pub async fn last_change_within(
    oracle: &dyn RemoteTimeOracle,
    repo: &RepoRef,
    remote_path: &str,
    timeout: Duration,
) -> Option<DateTime<Utc>> {
    match tokio::time::timeout(timeout, oracle.last_change_time(repo, remote_path)).await {
        Ok(time) => time,
        Err(_) => {
            warn!(path = %remote_path, "Remote time lookup timed out");
            None
        }
    }
}
