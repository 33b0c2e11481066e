//! Error types for the Driftstack orchestrator.
//!
//! This module provides a comprehensive error hierarchy for all operations
//! in the stack lifecycle: module graph resolution, state management,
//! planning, reconciliation, and pipeline execution.

use std::path::PathBuf;
use thiserror::Error;

use crate::graph::ResourceId;

/// The main error type for the Driftstack orchestrator.
#[derive(Debug, Error)]
pub enum DriftstackError {
    /// Module graph resolution errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Stack state store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation / apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Pipeline run errors.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Module registry errors.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Module graph resolution errors.
///
/// These are always fatal to the resolution and never retried automatically:
/// the module graph itself must be fixed.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency relation contains a cycle.
    #[error("Cyclic dependency detected: {cycle}")]
    CyclicDependency {
        /// The cycle rendered as `a -> b -> a`.
        cycle: String,
    },

    /// Two edges request incompatible version ranges for the same module.
    #[error(
        "Version conflict for module '{module}': selected {selected}, but '{requester}' requires {range}"
    )]
    VersionConflict {
        /// The contested module name.
        module: String,
        /// The version already selected for the deployment.
        selected: semver::Version,
        /// The module that introduced the conflicting edge.
        requester: String,
        /// The conflicting version range.
        range: semver::VersionReq,
    },

    /// A named dependency could not be found.
    #[error("Unresolved reference: module '{module}' matching {range} not found")]
    UnresolvedReference {
        /// The missing module name.
        module: String,
        /// The requested version range.
        range: semver::VersionReq,
    },

    /// A required parameter was not supplied by the instantiating parent.
    #[error("Missing required parameter '{parameter}' for module '{module}'")]
    MissingParameter {
        /// The module whose parameter is unsatisfied.
        module: String,
        /// The missing parameter name.
        parameter: String,
    },

    /// A dependency edge violates the product -> service -> resource layering.
    #[error("Invalid hierarchy: {module} ({kind}) may not depend on {dependency} ({dependency_kind})")]
    InvalidHierarchy {
        /// The depending module.
        module: String,
        /// Kind of the depending module.
        kind: String,
        /// The offending dependency.
        dependency: String,
        /// Kind of the dependency.
        dependency_kind: String,
    },

    /// A parameter binding referenced an unknown parent parameter.
    #[error("Unknown parameter reference '{reference}' in module '{module}'")]
    UnknownReference {
        /// The module containing the binding.
        module: String,
        /// The referenced parameter name.
        reference: String,
    },
}

/// Stack state store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// No record exists for the requested stack.
    #[error("Stack not found: {key}")]
    NotFound {
        /// The `environment/stack` key.
        key: String,
    },

    /// A `put` was based on a stale read of the record.
    ///
    /// Recoverable: recompute the plan against the latest record and retry.
    #[error("Concurrent modification of stack {key}: expected snapshot {expected:?}, found {found:?}")]
    ConcurrentModification {
        /// The `environment/stack` key.
        key: String,
        /// The snapshot hash the writer based its update on.
        expected: Option<String>,
        /// The snapshot hash actually stored.
        found: Option<String>,
    },

    /// A delete was attempted while resources are still managed.
    #[error("Stack {key} still manages {managed} resource(s); run a teardown apply first")]
    StackNotEmpty {
        /// The `environment/stack` key.
        key: String,
        /// Number of still-managed resources.
        managed: usize,
    },

    /// A stored record could not be read back.
    #[error("Stack record is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization of a record failed.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

/// Planning errors.
///
/// Fatal to the current plan and surfaced to the operator; the stack policy
/// or the snapshot must change before planning can succeed.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The same logical id is claimed by more than one resource specification.
    #[error("Ambiguous ownership of resource {id}: claimed by multiple specifications")]
    AmbiguousOwnership {
        /// The contested resource id.
        id: ResourceId,
    },

    /// The snapshot drops managed resources while the stack policy is `Deny`.
    #[error(
        "Unmanaging is not allowed for this stack: {count} managed resource(s) absent from the snapshot (first: {first})"
    )]
    UnmanageNotAllowed {
        /// Number of resources that would fall out of management.
        count: usize,
        /// The first affected resource id.
        first: ResourceId,
    },
}

/// Reconciliation / apply errors.
///
/// Always recoverable by re-running the same pipeline stage: the stack record
/// reflects the true managed set even after a partial failure.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A backend operation failed for a specific resource.
    #[error("Failed to {operation} resource {id}: {cause}")]
    OperationFailed {
        /// The operation that failed (`create`, `update`, `delete`).
        operation: String,
        /// The affected resource id.
        id: ResourceId,
        /// The underlying cause reported by the backend.
        cause: String,
    },

    /// A backend operation did not complete within its deadline.
    #[error("Deadline of {deadline_secs}s expired while running {operation} for resource {id}")]
    DeadlineExpired {
        /// The operation that timed out.
        operation: String,
        /// The affected resource id.
        id: ResourceId,
        /// The deadline that expired, in seconds.
        deadline_secs: u64,
    },
}

/// Pipeline run errors.
#[derive(Debug, Error)]
pub enum RunError {
    /// An approval stage received no signal within its timeout.
    #[error("Approval timeout for stage '{stage}' after {timeout_secs}s")]
    ApprovalTimeout {
        /// The approval stage id.
        stage: String,
        /// The timeout that expired, in seconds.
        timeout_secs: u64,
    },

    /// An approval stage was explicitly rejected.
    #[error("Stage '{stage}' rejected by {approver}: {reason}")]
    ApprovalRejected {
        /// The approval stage id.
        stage: String,
        /// Identity of the rejecting operator.
        approver: String,
        /// The stated reason.
        reason: String,
    },

    /// An approval signal targeted a stage that is not awaiting approval.
    #[error("No approval pending for stage '{stage}' of run {run_id}")]
    NoPendingApproval {
        /// The run id.
        run_id: String,
        /// The targeted stage id.
        stage: String,
    },

    /// The pipeline specification is malformed.
    #[error("Invalid pipeline '{pipeline}': {message}")]
    InvalidPipeline {
        /// The pipeline name.
        pipeline: String,
        /// Description of the problem.
        message: String,
    },

    /// The run was canceled by an external request.
    #[error("Run was canceled at stage '{stage}'")]
    Canceled {
        /// The stage at which cancellation took effect.
        stage: String,
    },
}

/// Module registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry directory was not found.
    #[error("Module registry not found: {path}")]
    DirNotFound {
        /// Path to the missing directory.
        path: PathBuf,
    },

    /// A module definition file could not be parsed.
    #[error("Failed to parse module definition {path}: {message}")]
    ParseError {
        /// Path to the offending file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Two definition files declare the same module name and version.
    #[error("Duplicate module definition: {module}@{version}")]
    DuplicateModule {
        /// The duplicated module name.
        module: String,
        /// The duplicated version.
        version: semver::Version,
    },
}

/// Result type alias for Driftstack operations.
pub type Result<T> = std::result::Result<T, DriftstackError>;

impl DriftstackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the failed operation is safe to retry.
    ///
    /// Graph and plan errors require operator intervention; apply errors and
    /// concurrent-modification failures are recoverable by re-running the
    /// stage (after re-planning, in the latter case).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Apply(_) | Self::State(StateError::ConcurrentModification { .. })
        )
    }
}

impl StateError {
    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl ApplyError {
    /// Creates an operation failure for a specific resource.
    #[must_use]
    pub fn operation(operation: &str, id: ResourceId, cause: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            id,
            cause: cause.into(),
        }
    }
}
