//! Backup Registry
//!
//! Persistent index of config snapshots backed by SQLite. The snapshot
//! bytes live next to the live config as `<config-path>.backup.<timestamp>`;
//! the registry records who took each one, when, why, and its SHA-256.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{content_hash, BackupMeta};
use crate::error::{Error, Result};

const SELECT_COLUMNS: &str =
    "SELECT id, filename, filepath, description, created_by, config_hash, size_bytes, created_at \
     FROM config_backups";

/// SQLite-backed registry of config snapshots
pub struct BackupRegistry {
    /// Database connection
    conn: Mutex<Connection>,
    /// Live config path; backup files are named after it
    config_path: PathBuf,
}

impl BackupRegistry {
    /// Create or open the registry database
    pub fn open(db_path: &Path, config_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_backups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                filepath TEXT NOT NULL,
                description TEXT NOT NULL,
                created_by TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_config_backups_hash
                ON config_backups(config_hash);
            "#,
        )?;

        debug!(db = %db_path.display(), "Backup registry opened");

        Ok(Self {
            conn: Mutex::new(conn),
            config_path,
        })
    }

    /// Store a snapshot of `content` and register it.
    ///
    /// If an earlier backup with the same hash is still intact on disk its
    /// file is reused; a new entry is recorded either way.
    pub async fn snapshot(
        &self,
        content: &[u8],
        created_by: &str,
        description: &str,
    ) -> Result<BackupMeta> {
        let hash = content_hash(content);
        let created_at = Utc::now().trunc_subsecs(6);
        let conn = self.conn.lock().await;

        let existing: Option<String> = conn
            .query_row(
                "SELECT filepath FROM config_backups WHERE config_hash = ?1 ORDER BY id DESC LIMIT 1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;

        let (path, fresh) = match existing.map(PathBuf::from) {
            Some(path) if file_matches(&path, &hash) => {
                debug!(hash = %hash, path = %path.display(), "Backup content already stored (deduplicated)");
                (path, false)
            }
            _ => (self.write_backup_file(content, created_at)?, true),
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let inserted = conn.execute(
            r#"
            INSERT INTO config_backups
                (filename, filepath, description, created_by, config_hash, size_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                filename,
                path.to_string_lossy().into_owned(),
                description,
                created_by,
                hash,
                content.len() as i64,
                created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        );
        if let Err(e) = inserted {
            // An unregistered file is never listed or reused
            if fresh {
                if let Err(rm) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %rm, "Could not remove unregistered backup file");
                }
            }
            return Err(e.into());
        }
        let id = conn.last_insert_rowid();

        info!(id, hash = %hash, path = %path.display(), created_by, "Config backup registered");

        Ok(BackupMeta {
            id,
            filename,
            path,
            description: description.to_string(),
            created_by: created_by.to_string(),
            hash,
            size_bytes: content.len() as u64,
            created_at,
        })
    }

    /// All backups, most recent first
    pub async fn list(&self) -> Result<Vec<BackupMeta>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], row_to_meta)?;

        let mut backups = Vec::new();
        for result in rows {
            backups.push(result?);
        }
        Ok(backups)
    }

    /// Look up one backup
    pub async fn get(&self, id: i64) -> Result<BackupMeta> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            row_to_meta,
        )
        .optional()?
        .ok_or(Error::BackupNotFound(id))
    }

    /// Read a backup's bytes, verifying them against the recorded hash
    pub async fn read(&self, id: i64) -> Result<Vec<u8>> {
        let meta = self.get(id).await?;
        let content = std::fs::read(&meta.path).map_err(|e| {
            Error::Backup(format!(
                "backup file {} unreadable: {}",
                meta.path.display(),
                e
            ))
        })?;

        let actual = content_hash(&content);
        if actual != meta.hash {
            return Err(Error::BackupCorrupted {
                id,
                expected: meta.hash,
                actual,
            });
        }
        Ok(content)
    }

    /// Check that a backup's file still matches its recorded hash
    pub async fn verify(&self, id: i64) -> Result<bool> {
        match self.read(id).await {
            Ok(_) => Ok(true),
            Err(Error::BackupCorrupted { .. }) | Err(Error::Backup(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write a new backup file, never overwriting an existing one
    fn write_backup_file(&self, content: &[u8], at: DateTime<Utc>) -> Result<PathBuf> {
        let stamp = at.format("%Y%m%d_%H%M%S_%6f");
        let base = format!("{}.backup.{}", self.config_path.display(), stamp);

        for attempt in 0..100 {
            let path = if attempt == 0 {
                PathBuf::from(&base)
            } else {
                PathBuf::from(format!("{}-{}", base, attempt))
            };

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(content)?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Backup(format!("could not find a free backup file name for {}", base)))
    }
}

fn file_matches(path: &Path, hash: &str) -> bool {
    std::fs::read(path)
        .map(|content| content_hash(&content) == hash)
        .unwrap_or(false)
}

fn row_to_meta(row: &Row<'_>) -> rusqlite::Result<BackupMeta> {
    let created_at: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(BackupMeta {
        id: row.get(0)?,
        filename: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        description: row.get(3)?,
        created_by: row.get(4)?,
        hash: row.get(5)?,
        size_bytes: row.get::<_, i64>(6)? as u64,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> BackupRegistry {
        BackupRegistry::open(&dir.join("state/backups.db"), dir.join("haproxy.cfg")).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_writes_named_copy() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        let meta = registry
            .snapshot(b"global\n    daemon\n", "alice", "manual")
            .await
            .unwrap();

        assert!(meta.filename.starts_with("haproxy.cfg.backup."));
        assert_eq!(std::fs::read(&meta.path).unwrap(), b"global\n    daemon\n");
        assert_eq!(meta.hash, content_hash(b"global\n    daemon\n"));
        assert_eq!(meta.created_by, "alice");
        assert_eq!(meta.size_bytes, 18);
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        let first = registry.snapshot(b"one", "alice", "first").await.unwrap();
        let second = registry.snapshot(b"two", "bob", "second").await.unwrap();
        let third = registry.snapshot(b"three", "carol", "third").await.unwrap();

        let ids: Vec<i64> = registry.list().await.unwrap().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);

        let fetched = registry.get(second.id).await.unwrap();
        assert_eq!(fetched.description, "second");
        assert_eq!(fetched.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_identical_content_shares_file() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        let a = registry.snapshot(b"same", "alice", "a").await.unwrap();
        let b = registry.snapshot(b"same", "bob", "b").await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.path, b.path);
        assert_eq!(registry.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_detects_corruption() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        let meta = registry.snapshot(b"original", "alice", "a").await.unwrap();
        assert_eq!(registry.read(meta.id).await.unwrap(), b"original");
        assert!(registry.verify(meta.id).await.unwrap());

        std::fs::write(&meta.path, b"tampered").unwrap();
        assert!(matches!(
            registry.read(meta.id).await,
            Err(Error::BackupCorrupted { .. })
        ));
        assert!(!registry.verify(meta.id).await.unwrap());

        // A fresh snapshot of the same content must not reuse the tampered file
        let again = registry.snapshot(b"original", "alice", "b").await.unwrap();
        assert_ne!(again.path, meta.path);
        assert_eq!(registry.read(again.id).await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_missing_backup() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        assert!(matches!(registry.get(42).await, Err(Error::BackupNotFound(42))));
        assert!(matches!(registry.verify(42).await, Err(Error::BackupNotFound(42))));
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_file() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        Connection::open(dir.path().join("state/backups.db"))
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_backups BEFORE INSERT ON config_backups \
                 BEGIN SELECT RAISE(ABORT, 'registry is read-only'); END;",
            )
            .unwrap();

        let result = registry.snapshot(b"orphan", "alice", "a").await;
        assert!(matches!(result, Err(Error::Registry(_))));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_registry_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = registry(dir.path())
            .snapshot(b"persisted", "alice", "a")
            .await
            .unwrap()
            .id;

        let reopened = registry(dir.path());
        assert_eq!(reopened.read(id).await.unwrap(), b"persisted");
    }
}
