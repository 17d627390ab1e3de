use crate::utils::IGNORE_FILE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Default name of the config file inside the base directory
pub const CONFIG_FILE: &str = "profile-sync.json";

const IGNORE_FILE_TEMPLATE: &str = "# Profile sync ignore list\n\
# One profile file name per line. Lines starting with # are comments.\n\
# Example:\n\
# Tested_Profile.json\n";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// External process run between the pull and push phases
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("SPT").join("user").join("profiles")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_mtime_tolerance_ms() -> u64 {
    2000
}

fn default_backup_keep() -> usize {
    5
}

fn default_oracle_timeout_ms() -> u64 {
    10_000
}

/// Profile sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Local folder holding the profile files. Relative paths resolve against the base dir.
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,
    /// Root under which timestamped backup folders are created
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Remote time must exceed local mtime by more than this to win
    #[serde(default = "default_mtime_tolerance_ms")]
    pub mtime_tolerance_ms: u64,
    /// Number of backup folders to retain; 0 keeps all
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
    /// Re-check the remote before pushing and hold back files changed remotely
    #[serde(default)]
    pub conflict_check: bool,
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            profiles_dir: default_profiles_dir(),
            backup_dir: default_backup_dir(),
            repo_url: None,
            github_token: None,
            mtime_tolerance_ms: default_mtime_tolerance_ms(),
            backup_keep: default_backup_keep(),
            conflict_check: false,
            oracle_timeout_ms: default_oracle_timeout_ms(),
            session: SessionConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Saturates at the largest representable margin; [`SyncConfig::validate`]
    /// rejects values that need it.
    pub fn mtime_tolerance(&self) -> chrono::Duration {
        let ms = i64::try_from(self.mtime_tolerance_ms).unwrap_or(i64::MAX);
        chrono::Duration::try_milliseconds(ms).unwrap_or(chrono::Duration::MAX)
    }

    /// Reject values that cannot be used as configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = i64::try_from(self.mtime_tolerance_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .is_some();
        if !in_range {
            return Err(ConfigError::InvalidValue {
                field: "mtimeToleranceMs",
                reason: format!("{} is out of range", self.mtime_tolerance_ms),
            });
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    /// Anchor relative paths at `base_dir`
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.profiles_dir.is_relative() {
            self.profiles_dir = base_dir.join(&self.profiles_dir);
        }
        if self.backup_dir.is_relative() {
            self.backup_dir = base_dir.join(&self.backup_dir);
        }
        if let Some(dir) = &self.session.working_dir {
            if dir.is_relative() {
                self.session.working_dir = Some(base_dir.join(dir));
            }
        }
    }
}

/// Read the configuration file
pub async fn read_config(config_path: &Path) -> Result<Option<SyncConfig>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(config_path).await?;
    let config: SyncConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(config_path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content).await?;
    Ok(())
}

/// Profile names excluded from every sync phase. Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    names: HashSet<String>,
}

impl IgnoreList {
    pub fn parse(content: &str) -> Self {
        let names = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.to_lowercase())
            .collect();
        Self { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names.into_iter().map(|n| n.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.names.contains(&file_name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Load the ignore list from `base_dir`, seeding a commented template when absent.
///
/// Failures are logged and yield an empty list.
pub async fn read_ignore_list(base_dir: &Path) -> IgnoreList {
    let path = base_dir.join(IGNORE_FILE);

    if !path.exists() {
        if let Err(e) = fs::write(&path, IGNORE_FILE_TEMPLATE).await {
            warn!(path = %path.display(), error = %e, "Could not create ignore list");
        }
        return IgnoreList::default();
    }

    match fs::read_to_string(&path).await {
        Ok(content) => {
            let list = IgnoreList::parse(&content);
            if !list.is_empty() {
                debug!(count = list.len(), "Loaded ignore list");
            }
            list
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read ignore list");
            IgnoreList::default()
        }
    }
}
