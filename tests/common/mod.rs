#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use profile_sync::remote::{
    FetchedProfiles, RemoteError, RemoteFetcher, RemoteTimeOracle, RemoteWriter, RepoRef,
};
use profile_sync::session::{SessionError, SessionOutcome, SessionRunner};
use profile_sync::utils::{file_mtime, set_file_mtime};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

pub fn repo() -> RepoRef {
    RepoRef::new("owner", "profiles")
}

/// Fixed reference instant so tests do not depend on the wall clock
pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub async fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    tokio::fs::create_dir_all(dir).await.expect("Should create dir");
    let path = dir.join(name);
    tokio::fs::write(&path, content).await.expect("Should write file");
    path
}

pub async fn write_file_at(dir: &Path, name: &str, content: &str, mtime: DateTime<Utc>) -> PathBuf {
    let path = write_file(dir, name, content).await;
    set_file_mtime(&path, mtime).await.expect("Should set mtime");
    path
}

pub async fn mtime_of(path: &Path) -> DateTime<Utc> {
    file_mtime(path).await.expect("Should read mtime")
}

pub async fn read(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.expect("Should read file")
}

/// In-memory remote store
#[derive(Default)]
pub struct MockRemote {
    /// Remote profile contents keyed by filename
    pub files: Mutex<BTreeMap<String, String>>,
    /// Last-change times keyed by remote path (`profiles/<name>`)
    pub times: Mutex<BTreeMap<String, DateTime<Utc>>>,
    /// Remote paths whose time lookup hangs
    pub slow_paths: HashSet<String>,
    /// Filenames whose upload fails
    pub failing_uploads: HashSet<String>,
    /// Filenames listed by a fetch but never staged
    pub failing_downloads: HashSet<String>,
    /// mtime given to staged copies; defaults to the time of staging
    pub staged_mtime: Option<DateTime<Utc>>,
    pub fetch_fails: bool,
    /// Remote paths uploaded, in order
    pub uploads: Mutex<Vec<String>>,
    /// Remote paths queried for time, in order
    pub time_queries: Mutex<Vec<String>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_time(self, name: &str, time: DateTime<Utc>) -> Self {
        self.set_time(name, time);
        self
    }

    pub fn set_time(&self, name: &str, time: DateTime<Utc>) {
        self.times
            .lock()
            .unwrap()
            .insert(format!("profiles/{name}"), time);
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn time_query_count(&self) -> usize {
        self.time_queries.lock().unwrap().len()
    }

    pub fn remote_content(&self, name: &str) -> Option<String> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl RemoteTimeOracle for MockRemote {
    async fn last_change_time(&self, _repo: &RepoRef, remote_path: &str) -> Option<DateTime<Utc>> {
        self.time_queries
            .lock()
            .unwrap()
            .push(remote_path.to_string());

        if self.slow_paths.contains(remote_path) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }

        self.times.lock().unwrap().get(remote_path).copied()
    }
}

#[async_trait]
impl RemoteFetcher for MockRemote {
    async fn fetch_profiles(
        &self,
        _repo: &RepoRef,
        dest_dir: &Path,
    ) -> Result<FetchedProfiles, RemoteError> {
        if self.fetch_fails {
            return Err(RemoteError::StatusError {
                status: 503,
                message: "unavailable".to_string(),
            });
        }

        let files = self.files.lock().unwrap().clone();
        let mut fetched = FetchedProfiles::default();
        for (name, content) in files {
            if self.failing_downloads.contains(&name) {
                fetched.failed.push(name);
                continue;
            }
            let path = dest_dir.join(&name);
            tokio::fs::write(&path, content).await?;
            if let Some(mtime) = self.staged_mtime {
                set_file_mtime(&path, mtime).await?;
            }
            fetched.staged.push(path);
        }
        Ok(fetched)
    }
}

#[async_trait]
impl RemoteWriter for MockRemote {
    async fn upload(
        &self,
        _repo: &RepoRef,
        remote_path: &str,
        local_file: &Path,
    ) -> Result<(), RemoteError> {
        let name = remote_path.trim_start_matches("profiles/").to_string();
        if self.failing_uploads.contains(&name) {
            return Err(RemoteError::StatusError {
                status: 409,
                message: "conflict".to_string(),
            });
        }

        let content = tokio::fs::read_to_string(local_file).await?;
        self.files.lock().unwrap().insert(name, content);
        self.uploads.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }
}

/// Stage remote copies the way the orchestrator does
pub async fn stage(remote: &MockRemote, staging: &Path) -> Vec<PathBuf> {
    remote
        .fetch_profiles(&repo(), staging)
        .await
        .expect("Should stage remote files")
        .staged
}

/// Session that writes the given files into the profile directory
pub struct ScriptedSession {
    pub profiles_dir: PathBuf,
    pub writes: Vec<(String, String)>,
    pub exit_code: i32,
    pub ran: Mutex<bool>,
}

impl ScriptedSession {
    pub fn new(profiles_dir: &Path) -> Self {
        Self {
            profiles_dir: profiles_dir.to_path_buf(),
            writes: Vec::new(),
            exit_code: 0,
            ran: Mutex::new(false),
        }
    }

    pub fn writing(mut self, name: &str, content: &str) -> Self {
        self.writes.push((name.to_string(), content.to_string()));
        self
    }

    pub fn failing(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn has_run(&self) -> bool {
        *self.ran.lock().unwrap()
    }
}

#[async_trait]
impl SessionRunner for ScriptedSession {
    async fn run(&self) -> Result<SessionOutcome, SessionError> {
        *self.ran.lock().unwrap() = true;
        for (name, content) in &self.writes {
            tokio::fs::write(self.profiles_dir.join(name), content)
                .await
                .expect("Session should write profile");
        }
        Ok(SessionOutcome {
            success: self.exit_code == 0,
            exit_code: Some(self.exit_code),
        })
    }
}

pub fn seconds(n: i64) -> Duration {
    Duration::seconds(n)
}
