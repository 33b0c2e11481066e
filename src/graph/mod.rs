//! Module graph resolution: declarative modules, dependency resolution,
//! and desired-state snapshot production.

mod module;
mod resolver;
mod snapshot;

pub use module::{
    Binding, DependencyRef, ModuleDefinition, ModuleKind, ModuleRef, ParameterSpec,
    ResourceTemplate,
};
pub use resolver::{Resolver, ResolveRequest};
pub use snapshot::{ResourceId, ResourceSpec, Snapshot, SpecHasher};
