//! External interface traits supplied by the embedding driver.
//!
//! The orchestrator core is backend-agnostic: module fetching, live scope
//! queries, and resource provisioning are all injected through these traits.
//! The core never talks to a cloud or a registry itself.

use async_trait::async_trait;
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{ModuleDefinition, ResourceId, ResourceSpec};

/// Read-only provider of module definitions.
///
/// Typically backed by a version-control tag lookup or a module registry.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Resolves the best available definition of `name` matching `range`.
    async fn resolve_module(&self, name: &str, range: &VersionReq) -> Result<ModuleDefinition>;
}

/// A resource observed live in the target scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveResource {
    /// Logical identity of the observed resource.
    pub id: ResourceId,
    /// Hash of the resource's current specification, as reported by the
    /// scope adapter over the declared fields only.
    pub spec_hash: String,
}

/// Read-only query of live resources in a cloud scope.
#[async_trait]
pub trait ScopeQuery: Send + Sync {
    /// Lists resources currently present under `scope`.
    async fn query_resources(&self, scope: &str) -> Result<Vec<LiveResource>>;
}

/// Provisioning operations against the target scope.
///
/// Supplied by a cloud-specific adapter; the reconciler depends only on this
/// contract and treats every operation as fallible and idempotent.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Creates the resource described by `spec`.
    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceId>;

    /// Updates the resource described by `spec` in place.
    async fn update(&self, spec: &ResourceSpec) -> Result<ResourceId>;

    /// Deletes the resource with the given id.
    async fn delete(&self, id: &ResourceId) -> Result<()>;
}

#[async_trait]
impl<T: ModuleSource + ?Sized> ModuleSource for Box<T> {
    async fn resolve_module(&self, name: &str, range: &VersionReq) -> Result<ModuleDefinition> {
        (**self).resolve_module(name, range).await
    }
}

#[async_trait]
impl<T: ProvisioningBackend + ?Sized> ProvisioningBackend for Box<T> {
    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        (**self).create(spec).await
    }

    async fn update(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        (**self).update(spec).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        (**self).delete(id).await
    }
}
