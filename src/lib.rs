// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Driftstack
//!
//! A declarative, idempotent deployment stack orchestrator.
//!
//! ## Overview
//!
//! Driftstack resolves versioned module graphs into desired-state snapshots
//! and converges live infrastructure to them:
//!
//! - Compose products from services and services from resource modules,
//!   with semver-ranged dependencies and explicit parameter propagation
//! - Diff the resolved snapshot against the stack's recorded state and the
//!   live scope into a create/update/delete plan
//! - Apply plans through pluggable provisioning backends with exact
//!   partial-failure bookkeeping
//! - Drive multi-environment rollouts through stage pipelines with
//!   operator approval gates
//!
//! ## Architecture
//!
//! The core loop is **desired state reconciliation**:
//!
//! 1. **Desired state**: a snapshot resolved from the module graph
//! 2. **Recorded state**: the stack record of what was last applied
//! 3. **Reconciler**: plans and executes the difference
//!
//! ## Modules
//!
//! - [`graph`]: module definitions and graph resolution into snapshots
//! - [`state`]: stack record storage with optimistic concurrency
//! - [`planner`]: the pure diff engine and plan types
//! - [`reconciler`]: plan execution with managed-set bookkeeping
//! - [`pipeline`]: stage pipelines, approval gates, and the orchestrator
//! - [`backend`]: traits the embedding driver implements
//! - [`registry`]: directory-backed module source for the CLI driver
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: rbac
//!   environment: nonprod
//!   scope: subscriptions/nonprod
//!
//! root:
//!   module: rbac
//!   range: '^1.0'
//!   parameters:
//!     environment: nonprod
//!
//! registry: modules
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod cli;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod planner;
pub mod reconciler;
pub mod registry;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{LiveResource, ModuleSource, ProvisioningBackend, ScopeQuery};
pub use cli::{Cli, Commands, OutputFormatter};
pub use error::{DriftstackError, Result};
pub use graph::{ModuleDefinition, ModuleKind, ModuleRef, Resolver, ResolveRequest, Snapshot};
pub use pipeline::{ApprovalHub, Orchestrator, PipelineRun, PipelineSpec, StageExecutor};
pub use planner::{DiffEngine, Plan};
pub use reconciler::{ApplyResult, Reconciler};
pub use registry::{DirModuleSource, FileScopeQuery};
pub use state::{LocalStackStore, MemoryStackStore, StackKey, StackRecord, StackStore};
