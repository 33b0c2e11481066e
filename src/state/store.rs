//! Stack store trait definition.
//!
//! This module defines the common interface for stack record storage
//! backends. Writes to the same key are serialized, and every `put`
//! carries the basis it was computed from so stale writes fail with
//! `ConcurrentModification` instead of silently overwriting.

use async_trait::async_trait;

use crate::error::Result;

use super::types::{PutBasis, StackKey, StackRecord};

/// Trait for stack record storage backends.
#[async_trait]
pub trait StackStore: Send + Sync {
    /// Loads the record for a stack.
    ///
    /// Returns `None` if the stack has never been applied.
    async fn get(&self, key: &StackKey) -> Result<Option<StackRecord>>;

    /// Atomically replaces the record for a stack.
    ///
    /// The write succeeds only if `basis` matches the currently stored
    /// state; otherwise it fails with `ConcurrentModification`.
    async fn put(&self, key: &StackKey, record: &StackRecord, basis: &PutBasis) -> Result<()>;

    /// Deletes the record for a stack.
    ///
    /// Only permitted when the managed set is empty; fails with
    /// `StackNotEmpty` otherwise, forcing an explicit teardown apply first.
    async fn delete(&self, key: &StackKey) -> Result<()>;

    /// Lists all known stack keys.
    async fn list(&self) -> Result<Vec<StackKey>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StackStore for Box<dyn StackStore> {
    async fn get(&self, key: &StackKey) -> Result<Option<StackRecord>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &StackKey, record: &StackRecord, basis: &PutBasis) -> Result<()> {
        (**self).put(key, record, basis).await
    }

    async fn delete(&self, key: &StackKey) -> Result<()> {
        (**self).delete(key).await
    }

    async fn list(&self) -> Result<Vec<StackKey>> {
        (**self).list().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
