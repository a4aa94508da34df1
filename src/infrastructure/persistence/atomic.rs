//! Atomic file writes: temp + fsync + rename, then directory fsync.
//!
//! A crash at any point leaves either the old record or the new one on
//! disk, never a torn file. Stale temp files from a crashed writer are
//! swept when a store opens.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const TMP_SUFFIX: &str = ".tmp";
const LOCK_NAME: &str = ".write.lock";

/// Blocking atomic write. Call through `spawn_blocking` from async code.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name in {}", path.display()))?;
    let tmp = dir.join(format!(".{}{}", file_name, TMP_SUFFIX));

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create temp file {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()
            .with_context(|| format!("fsync failed for {}", tmp.display()))?;
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("atomic rename to {} failed", path.display()))?;

    // Persist the rename itself
    fs::File::open(dir)?
        .sync_all()
        .with_context(|| format!("directory fsync failed for {}", dir.display()))?;

    Ok(())
}

pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serialization failed")?;
    atomic_write(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Exclusive multi-file write lock, scoped to a storage root.
///
/// Held for the duration of a multi-record update so a reader opening the
/// root mid-write can tell the store is in flux. Released on drop; a lock
/// left behind by a crash is swept by [`sweep_stale`].
pub struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_NAME);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("write lock already held at {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("WriteLock: failed to release {}: {}", self.path.display(), e);
        }
    }
}

/// Remove crash leftovers (temp files and an orphaned write lock) under
/// `root`, recursively. Completed renames stay; half-written temps go.
pub fn sweep_stale(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            sweep_stale(&path)?;
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(TMP_SUFFIX) || name == LOCK_NAME {
            warn!("Persistence: sweeping stale file {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qt-atomic-{}-{}", tag, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        value: i64,
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let root = temp_root("rw");
        let path = root.join("record.json");
        let rec = Record {
            name: "alpha".to_string(),
            value: 42,
        };

        atomic_write_json(&path, &rec).unwrap();
        let loaded: Record = read_json(&path).unwrap();
        assert_eq!(loaded, rec);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_overwrite_replaces_whole_record() {
        let root = temp_root("ow");
        let path = root.join("record.json");

        atomic_write_json(
            &path,
            &Record {
                name: "first".to_string(),
                value: 1,
            },
        )
        .unwrap();
        atomic_write_json(
            &path,
            &Record {
                name: "second".to_string(),
                value: 2,
            },
        )
        .unwrap();

        let loaded: Record = read_json(&path).unwrap();
        assert_eq!(loaded.name, "second");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_write_lock_is_exclusive_and_released() {
        let root = temp_root("lock");

        let lock = WriteLock::acquire(&root).unwrap();
        assert!(WriteLock::acquire(&root).is_err());
        drop(lock);
        assert!(WriteLock::acquire(&root).is_ok());

        // drop of second lock, then cleanup
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_sweep_removes_temps_and_lock_only() {
        let root = temp_root("sweep");
        fs::write(root.join("keep.json"), b"{}").unwrap();
        fs::write(root.join(".keep.json.tmp"), b"partial").unwrap();
        fs::write(root.join(LOCK_NAME), b"").unwrap();

        sweep_stale(&root).unwrap();

        assert!(root.join("keep.json").exists());
        assert!(!root.join(".keep.json.tmp").exists());
        assert!(!root.join(LOCK_NAME).exists());

        fs::remove_dir_all(&root).unwrap();
    }
}
