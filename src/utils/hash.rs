use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Block size used when streaming a file through the hasher
const HASH_BLOCK_SIZE: usize = 8 * 1024;

/// SHA-256 digest of a file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute SHA-256 digest of an in-memory buffer
pub fn compute_hash(content: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(content);
    ContentDigest(hasher.finalize().into())
}

/// Compute SHA-256 digest of a file's contents, streaming it in fixed-size blocks
pub async fn compute_file_hash(path: &Path) -> Result<ContentDigest, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(ContentDigest(hasher.finalize().into()))
}

/// Digest a file, or `None` when it is missing or unreadable.
///
/// Callers treat `None` as "cannot compare by content".
pub async fn file_digest(path: &Path) -> Option<ContentDigest> {
    match compute_file_hash(path).await {
        Ok(digest) => Some(digest),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not hash file");
            None
        }
    }
}
