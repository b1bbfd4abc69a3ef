//! Config backups
//!
//! Every apply snapshots the live config before touching it. Snapshots are
//! content-addressed with SHA-256 so a restore can prove it is putting back
//! exactly the bytes that were saved.

mod registry;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use registry::BackupRegistry;

/// A registered config snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    /// Registry id
    pub id: i64,
    /// Backup file name
    pub filename: String,
    /// Full path to the backup file
    pub path: PathBuf,
    /// Why the backup was taken
    pub description: String,
    /// Actor that triggered it
    pub created_by: String,
    /// SHA-256 of the content, lowercase hex
    pub hash: String,
    /// Content size
    pub size_bytes: u64,
    /// When it was taken
    pub created_at: DateTime<Utc>,
}

/// SHA-256 of `data` as lowercase hex
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
        assert_eq!(content_hash(b"a").len(), 64);
    }
}
