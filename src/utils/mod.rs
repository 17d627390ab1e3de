mod hash;

pub use hash::{compute_file_hash, compute_hash, file_digest, ContentDigest};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extension every profile file carries (case-sensitive)
pub const PROFILE_EXTENSION: &str = "json";

/// Folder inside the remote repository that holds the profiles
pub const REMOTE_PROFILES_DIR: &str = "profiles";

/// Name of the ignore list kept next to the config file
pub const IGNORE_FILE: &str = ".profilesyncignore";

/// Whether a bare filename follows the profile naming convention
pub fn is_profile_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }
    Path::new(name).extension().and_then(|e| e.to_str()) == Some(PROFILE_EXTENSION)
}

/// Path of a profile inside the remote repository
pub fn remote_profile_path(file_name: &str) -> String {
    format!("{REMOTE_PROFILES_DIR}/{file_name}")
}

/// Get the bare filename of a path as a String
pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

/// Read a file's modification time
pub async fn file_mtime(path: &Path) -> Result<DateTime<Utc>, std::io::Error> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Set a file's modification time
pub async fn set_file_mtime(path: &Path, time: DateTime<Utc>) -> Result<(), std::io::Error> {
    let path: PathBuf = path.to_path_buf();
    let time = SystemTime::from(time);

    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_modified(time)
    })
    .await
    .map_err(std::io::Error::other)?
}
