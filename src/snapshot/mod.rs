//! Point-in-time record of the local profile set.
//!
//! A snapshot maps each profile filename to its content digest. It is taken
//! before the session starts and compared against the directory afterwards to
//! find files whose *content* changed, regardless of what happened to their
//! timestamps.

use crate::config::IgnoreList;
use crate::utils::{file_digest, is_profile_file_name, ContentDigest};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A profile file discovered by listing the profile directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub file_name: String,
    pub path: PathBuf,
}

/// Filename to content digest mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: BTreeMap<String, ContentDigest>,
    /// Profiles present at capture time that could not be hashed
    unreadable: BTreeSet<String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<&ContentDigest> {
        self.entries.get(file_name)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.contains_key(file_name)
    }

    /// True when `file_name` was captured with exactly this digest
    pub fn is_unchanged(&self, file_name: &str, digest: &ContentDigest) -> bool {
        self.entries.get(file_name) == Some(digest)
    }

    pub fn record(&mut self, file_name: impl Into<String>, digest: ContentDigest) {
        let file_name = file_name.into();
        self.unreadable.remove(&file_name);
        self.entries.insert(file_name, digest);
    }

    pub fn forget(&mut self, file_name: &str) -> Option<ContentDigest> {
        self.unreadable.remove(file_name);
        self.entries.remove(file_name)
    }

    /// Note a profile whose content is unknown, so it is not mistaken for a new one
    pub fn mark_unreadable(&mut self, file_name: impl Into<String>) {
        let file_name = file_name.into();
        self.entries.remove(&file_name);
        self.unreadable.insert(file_name);
    }

    pub fn is_unreadable(&self, file_name: &str) -> bool {
        self.unreadable.contains(file_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in filename order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContentDigest)> {
        self.entries.iter()
    }
}

/// List profile files in a flat directory, sorted by filename.
///
/// Returns an empty list if the directory does not exist. An unreadable
/// directory is an error.
pub fn list_profile_files(
    profiles_dir: &Path,
    ignore: &IgnoreList,
) -> Result<Vec<ProfileEntry>, std::io::Error> {
    let mut files = Vec::new();

    if !profiles_dir.exists() {
        return Ok(files);
    }

    for entry in WalkDir::new(profiles_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => continue,
        };

        if !is_profile_file_name(&file_name) {
            continue;
        }

        if ignore.is_ignored(&file_name) {
            debug!(file = %file_name, "Ignoring profile");
            continue;
        }

        files.push(ProfileEntry {
            file_name,
            path: entry.path().to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Capture a snapshot of the profile directory.
///
/// A missing directory yields an empty snapshot. Files that cannot be hashed
/// are logged and marked unreadable.
pub async fn capture_snapshot(
    profiles_dir: &Path,
    ignore: &IgnoreList,
) -> Result<Snapshot, SnapshotError> {
    let mut snapshot = Snapshot::new();

    for entry in list_profile_files(profiles_dir, ignore)? {
        match file_digest(&entry.path).await {
            Some(digest) => snapshot.record(entry.file_name, digest),
            None => {
                warn!(file = %entry.file_name, "Could not hash profile for snapshot");
                snapshot.mark_unreadable(entry.file_name);
            }
        }
    }

    debug!(count = snapshot.len(), "Captured profile snapshot");
    Ok(snapshot)
}
