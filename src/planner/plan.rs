//! Plan types.
//!
//! A plan is the ephemeral output of the diff engine: three disjoint change
//! sets (creates, updates, deletes) plus detach bookkeeping. Plans are never
//! persisted; each one is consumed exactly once by a preview render or an
//! apply.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::{ResourceId, ResourceSpec};

/// A planned create or update of one resource.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedChange {
    /// Logical identity of the resource.
    pub id: ResourceId,
    /// The desired specification to converge to.
    pub spec: ResourceSpec,
    /// Hash of the previous specification, if one was recorded or observed.
    pub old_hash: Option<String>,
    /// Hash of the desired specification.
    pub new_hash: String,
    /// Declared fields whose last-applied hash differs, when known.
    pub changed_fields: Vec<String>,
}

/// A planned deletion of one managed resource.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedDelete {
    /// Logical identity of the resource.
    pub id: ResourceId,
    /// Hash of the last-applied specification.
    pub last_hash: String,
}

/// The complete plan for converging a stack to a snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Plan {
    /// Content hash of the snapshot this plan converges to.
    pub snapshot_hash: String,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Resources to create.
    pub to_create: Vec<PlannedChange>,
    /// Resources to update.
    pub to_update: Vec<PlannedChange>,
    /// Managed resources to delete (drift pruning).
    pub to_delete: Vec<PlannedDelete>,
    /// Managed resources to drop from the managed set without deletion.
    pub to_detach: Vec<ResourceId>,
}

impl Plan {
    /// Creates an empty plan for a snapshot.
    #[must_use]
    pub fn empty(snapshot_hash: &str) -> Self {
        Self {
            snapshot_hash: snapshot_hash.to_string(),
            created_at: Utc::now(),
            to_create: vec![],
            to_update: vec![],
            to_delete: vec![],
            to_detach: vec![],
        }
    }

    /// Returns true if the plan requires no action at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty()
            && self.to_update.is_empty()
            && self.to_delete.is_empty()
            && self.to_detach.is_empty()
    }

    /// Total number of backend operations the plan implies.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(
            f,
            "Plan for snapshot {} ({} operations):",
            &self.snapshot_hash[..8.min(self.snapshot_hash.len())],
            self.operation_count()
        )?;
        for change in &self.to_create {
            writeln!(f, "  + create {}", change.id)?;
        }
        for change in &self.to_update {
            if change.changed_fields.is_empty() {
                writeln!(f, "  ~ update {}", change.id)?;
            } else {
                writeln!(
                    f,
                    "  ~ update {} ({})",
                    change.id,
                    change.changed_fields.join(", ")
                )?;
            }
        }
        for delete in &self.to_delete {
            writeln!(f, "  - delete {}", delete.id)?;
        }
        for id in &self.to_detach {
            writeln!(f, "  / detach {id}")?;
        }
        Ok(())
    }
}
