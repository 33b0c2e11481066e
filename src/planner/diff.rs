//! Diff engine: desired snapshot vs. stack record vs. live scope.
//!
//! The engine is pure: given the same snapshot, record, and live resource
//! listing it always produces the same plan, and it never mutates state.
//! Update detection compares per-field hashes of the declared specification,
//! so drift in fields the specification never declared is ignored.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::backend::LiveResource;
use crate::error::{DriftstackError, PlanError, Result};
use crate::graph::{ResourceId, Snapshot, SpecHasher};
use crate::state::{StackRecord, UnmanagePolicy};

use super::plan::{Plan, PlannedChange, PlannedDelete};

/// Engine for computing plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine {
    /// Specification hasher.
    hasher: SpecHasher,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    /// Computes the plan converging the stack to `snapshot`.
    ///
    /// # Errors
    ///
    /// Fails with `AmbiguousOwnership` if the snapshot claims the same
    /// logical id twice, or `UnmanageNotAllowed` if managed resources fall
    /// out of scope while the stack policy is `Deny`.
    pub fn plan(
        &self,
        snapshot: &Snapshot,
        record: Option<&StackRecord>,
        live: &[LiveResource],
    ) -> Result<Plan> {
        self.check_ownership(snapshot)?;

        let live_by_id: HashMap<&ResourceId, &str> = live
            .iter()
            .map(|r| (&r.id, r.spec_hash.as_str()))
            .collect();
        let mut plan = Plan::empty(&snapshot.content_hash);

        for spec in &snapshot.resources {
            let new_hash = self.hasher.hash_spec(spec);
            let managed = record.and_then(|r| r.managed.get(&spec.id));

            match (managed, live_by_id.get(&spec.id)) {
                // Managed: field-by-field comparison against last applied.
                (Some(state), _) => {
                    let changed = Self::changed_fields(&state.field_hashes, spec, self.hasher);
                    if changed.is_empty() {
                        debug!("Resource {} is up to date", spec.id);
                    } else {
                        plan.to_update.push(PlannedChange {
                            id: spec.id.clone(),
                            spec: spec.clone(),
                            old_hash: Some(state.spec_hash.clone()),
                            new_hash,
                            changed_fields: changed,
                        });
                    }
                }
                // Live but never managed by this stack: bring it under
                // management by converging it to the declared spec.
                (None, Some(live_hash)) => {
                    plan.to_update.push(PlannedChange {
                        id: spec.id.clone(),
                        spec: spec.clone(),
                        old_hash: Some((*live_hash).to_string()),
                        new_hash,
                        changed_fields: vec![],
                    });
                }
                // Neither managed nor live: create.
                (None, None) => {
                    plan.to_create.push(PlannedChange {
                        id: spec.id.clone(),
                        spec: spec.clone(),
                        old_hash: None,
                        new_hash,
                        changed_fields: vec![],
                    });
                }
            }
        }

        self.plan_unmanaged(snapshot, record, &mut plan)?;

        debug!(
            "Plan: {} create, {} update, {} delete, {} detach",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len(),
            plan.to_detach.len()
        );
        Ok(plan)
    }

    /// Rejects snapshots in which two specifications claim the same id.
    fn check_ownership(&self, snapshot: &Snapshot) -> Result<()> {
        let mut seen: HashSet<&ResourceId> = HashSet::new();
        for spec in &snapshot.resources {
            if !seen.insert(&spec.id) {
                return Err(DriftstackError::Plan(PlanError::AmbiguousOwnership {
                    id: spec.id.clone(),
                }));
            }
        }
        Ok(())
    }

    /// Handles managed resources absent from the new snapshot, per policy.
    fn plan_unmanaged(
        &self,
        snapshot: &Snapshot,
        record: Option<&StackRecord>,
        plan: &mut Plan,
    ) -> Result<()> {
        let Some(record) = record else {
            return Ok(());
        };

        let in_snapshot: HashSet<&ResourceId> =
            snapshot.resources.iter().map(|r| &r.id).collect();
        let dropped: Vec<(&ResourceId, &crate::state::ManagedResource)> = record
            .managed
            .iter()
            .filter(|(id, _)| !in_snapshot.contains(id))
            .collect();

        if dropped.is_empty() {
            return Ok(());
        }

        match record.unmanage_policy {
            UnmanagePolicy::Delete => {
                for (id, state) in dropped {
                    debug!("Resource {id} fell out of scope, planning deletion");
                    plan.to_delete.push(PlannedDelete {
                        id: id.clone(),
                        last_hash: state.spec_hash.clone(),
                    });
                }
            }
            UnmanagePolicy::Detach => {
                plan.to_detach = dropped.iter().map(|(id, _)| (*id).clone()).collect();
            }
            UnmanagePolicy::Deny => {
                let first = dropped[0].0.clone();
                return Err(DriftstackError::Plan(PlanError::UnmanageNotAllowed {
                    count: dropped.len(),
                    first,
                }));
            }
        }
        Ok(())
    }

    /// Returns the declared fields whose last-applied hash differs.
    fn changed_fields(
        applied: &BTreeMap<String, String>,
        spec: &crate::graph::ResourceSpec,
        hasher: SpecHasher,
    ) -> Vec<String> {
        let desired = hasher.field_hashes(spec);
        let mut changed: Vec<String> = Vec::new();

        for (field, hash) in &desired {
            if applied.get(field) != Some(hash) {
                changed.push(field.clone());
            }
        }
        // Fields removed from the specification count as changes too.
        for field in applied.keys() {
            if !desired.contains_key(field) {
                changed.push(field.clone());
            }
        }
        changed.sort();
        changed.dedup();
        changed
    }
}
