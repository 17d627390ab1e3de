use crate::utils::{file_mtime, set_file_mtime};
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Name format of the per-backup folders (local time, second resolution)
pub const BACKUP_DIR_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Copies profiles aside before they are overwritten.
///
/// Backups are best effort: every failure is logged and reported as `None`,
/// never as an error.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    keep: usize,
}

impl BackupManager {
    /// `keep` is the number of timestamped folders retained; 0 disables pruning.
    pub fn new(root: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            root: root.into(),
            keep,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `file` into a new timestamped folder under the backup root
    pub async fn backup(&self, file: &Path) -> Option<PathBuf> {
        match self.copy_to_backup(file).await {
            Ok(backup_path) => {
                info!(file = %file.display(), backup = %backup_path.display(), "Backed up profile");
                self.prune().await;
                Some(backup_path)
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Backup failed, continuing without it");
                None
            }
        }
    }

    async fn copy_to_backup(&self, file: &Path) -> Result<PathBuf, std::io::Error> {
        let file_name = file.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;

        let backup_dir = self
            .root
            .join(Local::now().format(BACKUP_DIR_FORMAT).to_string());
        fs::create_dir_all(&backup_dir).await?;

        let backup_path = backup_dir.join(file_name);
        fs::copy(file, &backup_path).await?;

        let modified = file_mtime(file).await?;
        set_file_mtime(&backup_path, modified).await?;

        Ok(backup_path)
    }

    /// Remove the oldest backup folders beyond the retention count.
    ///
    /// Only folders named in [`BACKUP_DIR_FORMAT`] are touched. Returns how
    /// many folders were removed.
    pub async fn prune(&self) -> usize {
        if self.keep == 0 {
            return 0;
        }

        let mut backup_dirs = match self.list_backup_dirs().await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Could not list backups");
                return 0;
            }
        };

        // Newest first; the format sorts lexicographically by time
        backup_dirs.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = 0;
        for (name, path) in backup_dirs.into_iter().skip(self.keep) {
            match fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(backup = %name, "Removed old backup");
                    removed += 1;
                }
                Err(e) => warn!(backup = %name, error = %e, "Could not remove old backup"),
            }
        }
        removed
    }

    async fn list_backup_dirs(&self) -> Result<Vec<(String, PathBuf)>, std::io::Error> {
        let mut dirs = Vec::new();

        if !self.root.exists() {
            return Ok(dirs);
        }

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };

            if NaiveDateTime::parse_from_str(&name, BACKUP_DIR_FORMAT).is_ok() {
                dirs.push((name, entry.path()));
            }
        }

        Ok(dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backup_copies_file_and_mtime() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("profile1.json");
        fs::write(&source, "{\"v\":1}").await.unwrap();

        let manager = BackupManager::new(temp_dir.path().join("backups"), 5);
        let backup_path = manager.backup(&source).await.expect("backup should succeed");

        assert_eq!(backup_path.file_name().unwrap(), "profile1.json");
        assert!(backup_path.starts_with(temp_dir.path().join("backups")));
        assert_eq!(fs::read_to_string(&backup_path).await.unwrap(), "{\"v\":1}");
        assert_eq!(
            file_mtime(&backup_path).await.unwrap(),
            file_mtime(&source).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_backup_into_unusable_root_returns_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("profile1.json");
        fs::write(&source, "{}").await.unwrap();

        // A regular file where the backup root should be
        let blocked_root = temp_dir.path().join("backups");
        fs::write(&blocked_root, "not a directory").await.unwrap();

        let manager = BackupManager::new(&blocked_root, 5);
        assert!(manager.backup(&source).await.is_none());
    }

    #[tokio::test]
    async fn test_backup_of_missing_file_returns_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(temp_dir.path().join("backups"), 5);
        assert!(manager
            .backup(&temp_dir.path().join("missing.json"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_timestamp_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("backups");
        for name in [
            "20240101_000000",
            "20240102_000000",
            "20240103_000000",
            "20240104_000000",
            "keep-me",
        ] {
            fs::create_dir_all(root.join(name)).await.unwrap();
        }

        let manager = BackupManager::new(&root, 2);
        assert_eq!(manager.prune().await, 2);

        assert!(!root.join("20240101_000000").exists());
        assert!(!root.join("20240102_000000").exists());
        assert!(root.join("20240103_000000").exists());
        assert!(root.join("20240104_000000").exists());
        assert!(root.join("keep-me").exists());
    }

    #[tokio::test]
    async fn test_prune_disabled_with_zero_keep() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("backups");
        fs::create_dir_all(root.join("20240101_000000")).await.unwrap();

        let manager = BackupManager::new(&root, 0);
        assert_eq!(manager.prune().await, 0);
        assert!(root.join("20240101_000000").exists());
    }
}
