//! Stack state storage: persisted per-stack records with optimistic
//! concurrency, in memory or on the local filesystem.

mod local;
mod memory;
mod store;
mod types;

pub use local::LocalStackStore;
pub use memory::MemoryStackStore;
pub use store::StackStore;
pub use types::{
    ManagedResource, PutBasis, StackKey, StackRecord, UnmanagePolicy, RECORD_VERSION,
};
