//! Local file-based stack store.
//!
//! One JSON document per (environment, stack-name) key under a base
//! directory. Writes go through a per-key mutex and an atomic temp-file +
//! rename, so records stay durable and consistent across process restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DriftstackError, Result, StateError};

use super::memory::check_basis;
use super::store::StackStore;
use super::types::{PutBasis, StackKey, StackRecord};

/// Default state directory name.
const STATE_DIR: &str = ".driftstack";

/// Local file-based stack store.
#[derive(Debug)]
pub struct LocalStackStore {
    /// Base directory for record files.
    base_dir: PathBuf,
    /// Per-key write locks.
    locks: Mutex<HashMap<StackKey, Arc<Mutex<()>>>>,
}

impl LocalStackStore {
    /// Creates a store rooted at `.driftstack` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                DriftstackError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STATE_DIR);
        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store rooted at a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the record file for a key.
    fn record_path(&self, key: &StackKey) -> PathBuf {
        self.base_dir
            .join(format!("{}__{}.json", key.environment, key.stack))
    }

    /// Returns the write lock for a key, creating it on first use.
    async fn key_lock(&self, key: &StackKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.clone()).or_default().clone()
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await?;
        }
        Ok(())
    }

    /// Reads the record file for a key, if present.
    async fn read_record(&self, path: &Path) -> Result<Option<StackRecord>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await.map_err(|e| {
            DriftstackError::State(StateError::corrupted(format!(
                "Failed to read record file: {e}"
            )))
        })?;
        let record: StackRecord = serde_json::from_str(&content).map_err(|e| {
            DriftstackError::State(StateError::corrupted(format!(
                "Failed to parse record file: {e}"
            )))
        })?;
        Ok(Some(record))
    }

    /// Writes a record file atomically via temp-file + rename.
    async fn write_record(&self, path: &Path, record: &StackRecord) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(record).map_err(|e| {
            DriftstackError::State(StateError::serialization(format!(
                "Failed to serialize record: {e}"
            )))
        })?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await?;

        debug!("Record written to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl StackStore for LocalStackStore {
    async fn get(&self, key: &StackKey) -> Result<Option<StackRecord>> {
        self.read_record(&self.record_path(key)).await
    }

    async fn put(&self, key: &StackKey, record: &StackRecord, basis: &PutBasis) -> Result<()> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let path = self.record_path(key);
        let current = self.read_record(&path).await?;
        check_basis(key, current.as_ref(), basis)?;

        self.write_record(&path, record).await?;
        info!("Stored record for stack {key}");
        Ok(())
    }

    async fn delete(&self, key: &StackKey) -> Result<()> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let path = self.record_path(key);
        if let Some(record) = self.read_record(&path).await? {
            if !record.is_empty() {
                return Err(DriftstackError::State(StateError::StackNotEmpty {
                    key: key.to_string(),
                    managed: record.managed.len(),
                }));
            }
            info!("Deleting record for stack {key}");
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StackKey>> {
        if !self.base_dir.exists() {
            return Ok(vec![]);
        }
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some((environment, stack)) = stem.split_once("__") {
                keys.push(StackKey::new(environment, stack));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStackStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStackStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let (store, _temp) = create_test_store();
        let key = StackKey::new("nonprod", "rbac");
        let mut record = StackRecord::default();
        record.mark_applied("abc123");

        store
            .put(&key, &record, &PutBasis::Absent)
            .await
            .expect("put");

        let loaded = store.get(&key).await.expect("get").expect("record");
        assert_eq!(loaded.last_snapshot_hash.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_backend_type_is_local() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStackStore::with_base_dir(dir.path().join(".driftstack"));
        assert_eq!(store.backend_type(), "local");
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (store, _temp) = create_test_store();
        let key = StackKey::new("nonprod", "rbac");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_stale_basis_rejected() {
        let (store, _temp) = create_test_store();
        let key = StackKey::new("nonprod", "rbac");

        let mut record = StackRecord::default();
        store
            .put(&key, &record, &PutBasis::Absent)
            .await
            .expect("put");

        record.mark_applied("hash-1");
        store
            .put(&key, &record, &PutBasis::LastSnapshot(None))
            .await
            .expect("put");

        let err = store
            .put(&key, &record, &PutBasis::Absent)
            .await
            .expect_err("stale");
        assert!(matches!(
            err,
            DriftstackError::State(StateError::ConcurrentModification { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_keys() {
        let (store, _temp) = create_test_store();
        let record = StackRecord::default();
        for (env, stack) in [("dev", "rbac"), ("prod", "rbac"), ("dev", "network")] {
            store
                .put(&StackKey::new(env, stack), &record, &PutBasis::Absent)
                .await
                .expect("put");
        }

        let keys = store.list().await.expect("list");
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], StackKey::new("dev", "network"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().expect("temp dir");
        let key = StackKey::new("prod", "rbac");

        {
            let store = LocalStackStore::with_base_dir(temp_dir.path());
            let mut record = StackRecord::default();
            record.mark_applied("persisted");
            store
                .put(&key, &record, &PutBasis::Absent)
                .await
                .expect("put");
        }

        let reopened = LocalStackStore::with_base_dir(temp_dir.path());
        let loaded = reopened.get(&key).await.expect("get").expect("record");
        assert_eq!(loaded.last_snapshot_hash.as_deref(), Some("persisted"));
    }
}
