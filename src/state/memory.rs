//! In-memory stack store.
//!
//! Used for tests and for embedding the orchestrator without durable state.
//! A single map mutex serializes all writes, which trivially satisfies the
//! per-key serialization requirement.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DriftstackError, Result, StateError};

use super::store::StackStore;
use super::types::{PutBasis, StackKey, StackRecord};

/// In-memory stack store.
#[derive(Debug, Default)]
pub struct MemoryStackStore {
    /// Records by key.
    records: Mutex<HashMap<StackKey, StackRecord>>,
}

impl MemoryStackStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Checks a write basis against the currently stored record.
pub(super) fn check_basis(
    key: &StackKey,
    current: Option<&StackRecord>,
    basis: &PutBasis,
) -> Result<()> {
    let found = current.map(|r| r.last_snapshot_hash.clone());
    let matches = match (basis, &found) {
        (PutBasis::Absent, None) => true,
        (PutBasis::LastSnapshot(expected), Some(stored)) => expected == stored,
        _ => false,
    };
    if matches {
        return Ok(());
    }
    let expected = match basis {
        PutBasis::Absent => None,
        PutBasis::LastSnapshot(hash) => hash.clone(),
    };
    Err(DriftstackError::State(StateError::ConcurrentModification {
        key: key.to_string(),
        expected,
        found: found.flatten(),
    }))
}

#[async_trait]
impl StackStore for MemoryStackStore {
    async fn get(&self, key: &StackKey) -> Result<Option<StackRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &StackKey, record: &StackRecord, basis: &PutBasis) -> Result<()> {
        let mut records = self.records.lock().await;
        check_basis(key, records.get(key), basis)?;
        records.insert(key.clone(), record.clone());
        debug!("Stored record for stack {key}");
        Ok(())
    }

    async fn delete(&self, key: &StackKey) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(key) {
            if !record.is_empty() {
                return Err(DriftstackError::State(StateError::StackNotEmpty {
                    key: key.to_string(),
                    managed: record.managed.len(),
                }));
            }
            records.remove(key);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StackKey>> {
        let mut keys: Vec<StackKey> = self.records.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::UnmanagePolicy;

    #[tokio::test]
    async fn test_backend_type_is_memory() {
        let store = MemoryStackStore::new();
        assert_eq!(store.backend_type(), "memory");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStackStore::new();
        let key = StackKey::new("dev", "rbac");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStackStore::new();
        let key = StackKey::new("dev", "rbac");
        let record = StackRecord::default();

        store
            .put(&key, &record, &PutBasis::Absent)
            .await
            .expect("put");
        let loaded = store.get(&key).await.expect("get").expect("record");
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_stale_put_fails() {
        let store = MemoryStackStore::new();
        let key = StackKey::new("dev", "rbac");

        let mut record = StackRecord::default();
        store
            .put(&key, &record, &PutBasis::Absent)
            .await
            .expect("put");

        // A writer commits an apply.
        record.mark_applied("hash-1");
        store
            .put(&key, &record, &PutBasis::LastSnapshot(None))
            .await
            .expect("put");

        // A second writer based on the pre-apply read must fail.
        let err = store
            .put(&key, &record, &PutBasis::LastSnapshot(None))
            .await
            .expect_err("stale put");
        assert!(matches!(
            err,
            DriftstackError::State(StateError::ConcurrentModification { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_requires_empty_managed_set() {
        let store = MemoryStackStore::new();
        let key = StackKey::new("dev", "rbac");

        let mut record = StackRecord::new(UnmanagePolicy::Delete);
        let spec = crate::graph::ResourceSpec {
            id: crate::graph::ResourceId::new("sub/dev", "resource-group", "rg-app"),
            properties: std::collections::BTreeMap::new(),
        };
        record.set_managed(
            spec.id.clone(),
            crate::state::ManagedResource::from_spec(&spec),
        );
        store
            .put(&key, &record, &PutBasis::Absent)
            .await
            .expect("put");

        let err = store.delete(&key).await.expect_err("must fail");
        assert!(matches!(
            err,
            DriftstackError::State(StateError::StackNotEmpty { .. })
        ));

        record.remove_managed(&spec.id);
        store
            .put(&key, &record, &record.basis())
            .await
            .expect("put");
        store.delete(&key).await.expect("delete");
        assert!(store.get(&key).await.expect("get").is_none());
    }
}
