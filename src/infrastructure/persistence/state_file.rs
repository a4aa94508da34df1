//! Small atomic state files for subsystem checkpoints (monitor known-id
//! set, daily counters). Same temp+fsync+rename discipline as the memory
//! store, without the multi-record lock.

use crate::infrastructure::persistence::atomic::{atomic_write_json, read_json};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn save<T: Serialize + Send + Sync + Clone + 'static>(&self, value: &T) -> Result<()> {
        let path = self.path.clone();
        let value = value.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            atomic_write_json(&path, &value)
        })
        .await
        .context("state write task panicked")?
    }

    /// Load the checkpoint, or `None` when it has never been written.
    pub async fn load<T: DeserializeOwned + Send + 'static>(&self) -> Result<Option<T>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<T>> {
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(read_json(&path)?))
        })
        .await
        .context("state read task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_round_trip_and_missing_file() {
        let path = std::env::temp_dir()
            .join(format!("qt-state-{}", uuid::Uuid::new_v4()))
            .join("monitor.json");
        let file = StateFile::new(path.clone());

        let empty: Option<HashSet<String>> = file.load().await.unwrap();
        assert!(empty.is_none());

        let mut ids = HashSet::new();
        ids.insert("a1".to_string());
        ids.insert("b2".to_string());
        file.save(&ids).await.unwrap();

        let loaded: Option<HashSet<String>> = file.load().await.unwrap();
        assert_eq!(loaded.unwrap(), ids);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
