//! Desired-state snapshots and deterministic content hashing.
//!
//! A snapshot is the fully-resolved output of evaluating a product module
//! with a concrete parameter set for one (environment, scope) pair. It is
//! immutable once produced and identified by its content hash, so identical
//! resolutions always hash identically.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Stable logical identity of a resource: name + type + scope path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    /// Scope path the resource lives under.
    pub scope: String,
    /// Resource type identifier.
    pub resource_type: String,
    /// Logical resource name.
    pub name: String,
}

/// A fully-resolved resource specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Stable logical identity.
    pub id: ResourceId,
    /// Resolved property values, keyed by field name.
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// A desired-state snapshot for one (environment, scope) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Target environment.
    pub environment: String,
    /// Target scope path.
    pub scope: String,
    /// Root module that produced this snapshot, as `name@version`.
    pub root_module: String,
    /// Ordered resource specifications (dependency order: leaves first).
    pub resources: Vec<ResourceSpec>,
    /// Deterministic content hash over everything above.
    pub content_hash: String,
}

/// Hasher for snapshots and resource specifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecHasher;

impl ResourceId {
    /// Creates a new resource id.
    #[must_use]
    pub fn new(scope: &str, resource_type: &str, name: &str) -> Self {
        Self {
            scope: scope.to_string(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}::{}", self.scope, self.resource_type, self.name)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let mut parts = value.rsplitn(3, "::");
        let name = parts.next();
        let resource_type = parts.next();
        let scope = parts.next();
        match (scope, resource_type, name) {
            (Some(scope), Some(resource_type), Some(name)) => Ok(Self {
                scope: scope.to_string(),
                resource_type: resource_type.to_string(),
                name: name.to_string(),
            }),
            _ => Err(format!("malformed resource id: {value}")),
        }
    }
}

impl SpecHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a single declared property value.
    ///
    /// Values are hashed via their canonical JSON encoding; `serde_json`
    /// serializes maps in key order, so the encoding is deterministic.
    #[must_use]
    pub fn hash_field(&self, name: &str, value: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes per-field hashes for every declared property of a spec.
    ///
    /// Comparing field hashes rather than whole objects lets the diff engine
    /// ignore drift in fields the specification never declared.
    #[must_use]
    pub fn field_hashes(&self, spec: &ResourceSpec) -> BTreeMap<String, String> {
        spec.properties
            .iter()
            .map(|(name, value)| (name.clone(), self.hash_field(name, value)))
            .collect()
    }

    /// Computes the hash of a full resource specification.
    #[must_use]
    pub fn hash_spec(&self, spec: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();
        hasher.update(spec.id.to_string().as_bytes());
        for (name, field_hash) in self.field_hashes(spec) {
            hasher.update(name.as_bytes());
            hasher.update(field_hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes the content hash of a snapshot.
    #[must_use]
    pub fn hash_snapshot(
        &self,
        environment: &str,
        scope: &str,
        root_module: &str,
        resources: &[ResourceSpec],
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(environment.as_bytes());
        hasher.update([0u8]);
        hasher.update(scope.as_bytes());
        hasher.update([0u8]);
        hasher.update(root_module.as_bytes());
        for spec in resources {
            hasher.update(self.hash_spec(spec).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the first 8 characters of a hash for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

impl Snapshot {
    /// Assembles a snapshot, computing its content hash.
    #[must_use]
    pub fn assemble(
        environment: &str,
        scope: &str,
        root_module: &str,
        resources: Vec<ResourceSpec>,
    ) -> Self {
        let content_hash =
            SpecHasher::new().hash_snapshot(environment, scope, root_module, &resources);
        Self {
            environment: environment.to_string(),
            scope: scope.to_string(),
            root_module: root_module.to_string(),
            resources,
            content_hash,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, value: &str) -> ResourceSpec {
        let mut properties = BTreeMap::new();
        properties.insert(
            String::from("location"),
            serde_json::Value::String(value.to_string()),
        );
        ResourceSpec {
            id: ResourceId::new("sub/nonprod", "resource-group", name),
            properties,
        }
    }

    #[test]
    fn test_spec_hash_deterministic() {
        let hasher = SpecHasher::new();
        let a = spec("rg-app", "westeurope");
        let b = spec("rg-app", "westeurope");
        assert_eq!(hasher.hash_spec(&a), hasher.hash_spec(&b));
    }

    #[test]
    fn test_spec_hash_changes_with_field() {
        let hasher = SpecHasher::new();
        let a = spec("rg-app", "westeurope");
        let b = spec("rg-app", "northeurope");
        assert_ne!(hasher.hash_spec(&a), hasher.hash_spec(&b));
    }

    #[test]
    fn test_field_hashes_ignore_undeclared_fields() {
        let hasher = SpecHasher::new();
        let a = spec("rg-app", "westeurope");
        let hashes = hasher.field_hashes(&a);
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("location"));
    }

    #[test]
    fn test_resource_id_round_trip() {
        let id = ResourceId::new("sub/nonprod/app", "role-assignment", "reader");
        let encoded = String::from(id.clone());
        let decoded = ResourceId::try_from(encoded).expect("decode");
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_snapshot_hash_covers_order_and_scope() {
        let a = Snapshot::assemble(
            "nonprod",
            "sub/nonprod",
            "rbac@1.0.0",
            vec![spec("one", "x"), spec("two", "y")],
        );
        let b = Snapshot::assemble(
            "nonprod",
            "sub/nonprod",
            "rbac@1.0.0",
            vec![spec("two", "y"), spec("one", "x")],
        );
        assert_ne!(a.content_hash, b.content_hash);

        let c = Snapshot::assemble(
            "prod",
            "sub/nonprod",
            "rbac@1.0.0",
            vec![spec("one", "x"), spec("two", "y")],
        );
        assert_ne!(a.content_hash, c.content_hash);
    }
}
