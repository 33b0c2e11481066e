//! Stack record types.
//!
//! A stack record is the persisted truth about one (environment, stack-name)
//! pair: which resources the stack manages, the hash of the last applied
//! snapshot, and the policy governing resources that fall out of scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{ResourceId, ResourceSpec, SpecHasher};

/// Current version of the stack record format.
pub const RECORD_VERSION: &str = "1.0";

/// Key identifying one stack: (environment, stack name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StackKey {
    /// Environment name.
    pub environment: String,
    /// Stack name.
    pub stack: String,
}

/// Policy governing previously managed resources absent from a new snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnmanagePolicy {
    /// Plan them for deletion (drift pruning).
    #[default]
    Delete,
    /// Drop them from the managed set without deletion.
    Detach,
    /// Fail the plan; protected stacks never lose resources implicitly.
    Deny,
}

/// Bookkeeping for one managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedResource {
    /// Hash of the last-applied specification.
    pub spec_hash: String,
    /// Per-field hashes of the last-applied specification, used for
    /// field-by-field drift comparison.
    pub field_hashes: BTreeMap<String, String>,
    /// When this resource was last applied.
    pub applied_at: DateTime<Utc>,
}

/// The persisted state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackRecord {
    /// Record format version.
    pub version: String,
    /// Resources this stack manages, keyed by logical id.
    pub managed: BTreeMap<ResourceId, ManagedResource>,
    /// Content hash of the last fully applied snapshot.
    pub last_snapshot_hash: Option<String>,
    /// When the stack was last successfully applied.
    pub last_applied_at: Option<DateTime<Utc>>,
    /// Policy for resources that fall out of scope.
    pub unmanage_policy: UnmanagePolicy,
}

/// Optimistic-concurrency basis for a `put`: what the writer last observed.
///
/// A put based on a stale observation fails with `ConcurrentModification`
/// instead of silently overwriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutBasis {
    /// The writer observed no record for the key.
    Absent,
    /// The writer observed a record with this last snapshot hash.
    LastSnapshot(Option<String>),
}

impl StackKey {
    /// Creates a new stack key.
    #[must_use]
    pub fn new(environment: &str, stack: &str) -> Self {
        Self {
            environment: environment.to_string(),
            stack: stack.to_string(),
        }
    }
}

impl std::fmt::Display for StackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.environment, self.stack)
    }
}

impl ManagedResource {
    /// Creates bookkeeping for a freshly applied specification.
    #[must_use]
    pub fn from_spec(spec: &ResourceSpec) -> Self {
        let hasher = SpecHasher::new();
        Self {
            spec_hash: hasher.hash_spec(spec),
            field_hashes: hasher.field_hashes(spec),
            applied_at: Utc::now(),
        }
    }
}

impl StackRecord {
    /// Creates a new empty record with the given policy.
    #[must_use]
    pub fn new(unmanage_policy: UnmanagePolicy) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            managed: BTreeMap::new(),
            last_snapshot_hash: None,
            last_applied_at: None,
            unmanage_policy,
        }
    }

    /// Returns the put basis corresponding to this record as read.
    #[must_use]
    pub fn basis(&self) -> PutBasis {
        PutBasis::LastSnapshot(self.last_snapshot_hash.clone())
    }

    /// Returns true if the stack manages no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managed.is_empty()
    }

    /// Returns all managed resource ids.
    #[must_use]
    pub fn managed_ids(&self) -> Vec<&ResourceId> {
        self.managed.keys().collect()
    }

    /// Records a resource as managed with fresh bookkeeping.
    pub fn set_managed(&mut self, id: ResourceId, resource: ManagedResource) {
        self.managed.insert(id, resource);
    }

    /// Removes a resource from the managed set.
    pub fn remove_managed(&mut self, id: &ResourceId) -> Option<ManagedResource> {
        self.managed.remove(id)
    }

    /// Marks a snapshot as fully applied.
    pub fn mark_applied(&mut self, snapshot_hash: &str) {
        self.last_snapshot_hash = Some(snapshot_hash.to_string());
        self.last_applied_at = Some(Utc::now());
    }
}

impl Default for StackRecord {
    fn default() -> Self {
        Self::new(UnmanagePolicy::default())
    }
}

impl std::fmt::Display for UnmanagePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Delete => "delete",
            Self::Detach => "detach",
            Self::Deny => "deny",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_starts_empty() {
        let record = StackRecord::default();
        assert!(record.is_empty());
        assert_eq!(record.unmanage_policy, UnmanagePolicy::Delete);
        assert_eq!(record.basis(), PutBasis::LastSnapshot(None));
    }

    #[test]
    fn test_managed_round_trip() {
        let mut record = StackRecord::default();
        let spec = ResourceSpec {
            id: crate::graph::ResourceId::new("sub/dev", "resource-group", "rg-app"),
            properties: BTreeMap::new(),
        };
        record.set_managed(spec.id.clone(), ManagedResource::from_spec(&spec));
        assert_eq!(record.managed_ids().len(), 1);

        let json = serde_json::to_string(&record).expect("serialize");
        let decoded: StackRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(record, decoded);
    }
}
