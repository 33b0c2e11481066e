//! Reconciler: applies a plan against the target scope.
//!
//! Creates and updates run first, deletions last, so a resource another
//! planned resource still references is never destroyed mid-apply. The
//! stack record is updated after every successful backend operation and
//! committed before any error surfaces, so the managed set always reflects
//! reality and a retry plans only the remainder.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::backend::ProvisioningBackend;
use crate::error::{ApplyError, DriftstackError, Result};
use crate::graph::ResourceId;
use crate::planner::Plan;
use crate::state::{ManagedResource, PutBasis, StackKey, StackRecord, StackStore};

/// Reconciler for converging a stack to a plan.
pub struct Reconciler<'a, B: ProvisioningBackend, S: StackStore> {
    /// Provisioning backend adapter.
    backend: &'a B,
    /// Stack state store.
    store: &'a S,
    /// Optional per-operation deadline.
    op_deadline: Option<Duration>,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ApplyResult {
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources detached from the managed set.
    pub detached: usize,
}

impl<'a, B: ProvisioningBackend, S: StackStore> Reconciler<'a, B, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(backend: &'a B, store: &'a S) -> Self {
        Self {
            backend,
            store,
            op_deadline: None,
        }
    }

    /// Sets a deadline applied to every backend operation.
    #[must_use]
    pub const fn with_op_deadline(mut self, deadline: Duration) -> Self {
        self.op_deadline = Some(deadline);
        self
    }

    /// Applies a plan, committing managed-set bookkeeping as it goes.
    ///
    /// `record` and `basis` must come from the same read of the stack store
    /// that the plan was computed against; the final commit is rejected with
    /// `ConcurrentModification` if the stored record moved underneath.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyError`] on the first failed backend operation. The
    /// stack record is committed with all successes up to that point before
    /// the error is returned.
    pub async fn apply(
        &self,
        key: &StackKey,
        plan: &Plan,
        record: StackRecord,
        basis: PutBasis,
    ) -> Result<ApplyResult> {
        info!(
            "Applying plan to stack {key}: {} create, {} update, {} delete, {} detach",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len(),
            plan.to_detach.len()
        );

        let mut working = record;
        let mut result = ApplyResult::default();

        for change in &plan.to_create {
            let outcome = self
                .run_op("create", &change.id, self.backend.create(&change.spec))
                .await;
            match outcome {
                Ok(_) => {
                    working.set_managed(change.id.clone(), ManagedResource::from_spec(&change.spec));
                    result.created += 1;
                    debug!("Created resource {}", change.id);
                }
                Err(err) => return self.surface_partial(key, &working, &basis, err).await,
            }
        }

        for change in &plan.to_update {
            let outcome = self
                .run_op("update", &change.id, self.backend.update(&change.spec))
                .await;
            match outcome {
                Ok(_) => {
                    working.set_managed(change.id.clone(), ManagedResource::from_spec(&change.spec));
                    result.updated += 1;
                    debug!("Updated resource {}", change.id);
                }
                Err(err) => return self.surface_partial(key, &working, &basis, err).await,
            }
        }

        // Detached resources leave the managed set without backend calls.
        for id in &plan.to_detach {
            working.remove_managed(id);
            result.detached += 1;
            debug!("Detached resource {id}");
        }

        // Deletions last: nothing still planned can reference them by now.
        for delete in &plan.to_delete {
            let outcome = self
                .run_op("delete", &delete.id, self.delete_unit(&delete.id))
                .await;
            match outcome {
                Ok(()) => {
                    working.remove_managed(&delete.id);
                    result.deleted += 1;
                    debug!("Deleted resource {}", delete.id);
                }
                Err(err) => return self.surface_partial(key, &working, &basis, err).await,
            }
        }

        working.mark_applied(&plan.snapshot_hash);
        self.store.put(key, &working, &basis).await?;

        info!(
            "Apply to stack {key} complete: {} created, {} updated, {} deleted, {} detached",
            result.created, result.updated, result.deleted, result.detached
        );
        Ok(result)
    }

    /// Adapts `delete` to a uniform `Result<()>` future.
    async fn delete_unit(&self, id: &ResourceId) -> Result<()> {
        self.backend.delete(id).await
    }

    /// Runs one backend operation under the configured deadline.
    async fn run_op<T>(
        &self,
        operation: &str,
        id: &ResourceId,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let outcome = match self.op_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(DriftstackError::Apply(ApplyError::DeadlineExpired {
                        operation: operation.to_string(),
                        id: id.clone(),
                        deadline_secs: deadline.as_secs(),
                    }));
                }
            },
            None => fut.await,
        };
        outcome.map_err(|err| match err {
            apply @ DriftstackError::Apply(_) => apply,
            other => DriftstackError::Apply(ApplyError::operation(
                operation,
                id.clone(),
                other.to_string(),
            )),
        })
    }

    /// Commits partial-success bookkeeping, then surfaces the apply error.
    async fn surface_partial(
        &self,
        key: &StackKey,
        working: &StackRecord,
        basis: &PutBasis,
        err: DriftstackError,
    ) -> Result<ApplyResult> {
        error!("Apply to stack {key} failed: {err}");
        if let Err(commit_err) = self.store.put(key, working, basis).await {
            // The managed set could not be recorded; that failure
            // supersedes the apply error for the caller.
            error!("Failed to commit partial apply bookkeeping for {key}: {commit_err}");
            return Err(commit_err);
        }
        Err(err)
    }
}

impl std::fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} detached",
            self.created, self.updated, self.deleted, self.detached
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LiveResource;
    use crate::graph::{ResourceSpec, Snapshot};
    use crate::planner::DiffEngine;
    use crate::state::{MemoryStackStore, UnmanagePolicy};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Fake backend that records operations and fails on configured ids.
    #[derive(Default)]
    struct FakeBackend {
        fail_on: Vec<ResourceId>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl FakeBackend {
        fn failing_on(id: &ResourceId) -> Self {
            Self {
                fail_on: vec![id.clone()],
                ..Self::default()
            }
        }

        fn record(&self, op: &str, id: &ResourceId) {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("{op} {id}"));
        }

        fn check(&self, op: &str, id: &ResourceId) -> Result<()> {
            if self.fail_on.contains(id) {
                return Err(DriftstackError::internal(format!(
                    "backend rejected {op} of {id}"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProvisioningBackend for FakeBackend {
        async fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.record("create", &spec.id);
            self.check("create", &spec.id)?;
            Ok(spec.id.clone())
        }

        async fn update(&self, spec: &ResourceSpec) -> Result<ResourceId> {
            self.record("update", &spec.id);
            self.check("update", &spec.id)?;
            Ok(spec.id.clone())
        }

        async fn delete(&self, id: &ResourceId) -> Result<()> {
            self.record("delete", id);
            self.check("delete", id)
        }
    }

    fn spec(name: &str) -> ResourceSpec {
        let mut properties = BTreeMap::new();
        properties.insert(
            String::from("location"),
            serde_json::Value::String(String::from("westeurope")),
        );
        ResourceSpec {
            id: ResourceId::new("sub/nonprod", "resource-group", name),
            properties,
        }
    }

    fn snapshot(resources: Vec<ResourceSpec>) -> Snapshot {
        Snapshot::assemble("nonprod", "sub/nonprod", "rbac@1.0.0", resources)
    }

    async fn plan_for(
        store: &MemoryStackStore,
        key: &StackKey,
        snap: &Snapshot,
    ) -> (crate::planner::Plan, StackRecord, PutBasis) {
        let record = store.get(key).await.expect("get");
        let plan = DiffEngine::new()
            .plan(snap, record.as_ref(), &[])
            .expect("plan");
        let (record, basis) = record.map_or_else(
            || (StackRecord::new(UnmanagePolicy::Delete), PutBasis::Absent),
            |r| {
                let basis = r.basis();
                (r, basis)
            },
        );
        (plan, record, basis)
    }

    #[tokio::test]
    async fn test_first_apply_manages_all_resources() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend::default();
        let key = StackKey::new("nonprod", "rbac");
        let snap = snapshot(vec![spec("rg-app"), spec("reader")]);

        let (plan, record, basis) = plan_for(&store, &key, &snap).await;
        let result = Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        assert_eq!(result.created, 2);
        let stored = store.get(&key).await.expect("get").expect("record");
        assert_eq!(stored.managed.len(), 2);
        assert_eq!(
            stored.last_snapshot_hash.as_deref(),
            Some(snap.content_hash.as_str())
        );
    }

    #[tokio::test]
    async fn test_second_apply_is_idempotent() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend::default();
        let key = StackKey::new("nonprod", "rbac");
        let snap = snapshot(vec![spec("rg-app"), spec("reader")]);

        let (plan, record, basis) = plan_for(&store, &key, &snap).await;
        Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        let (second_plan, _, _) = plan_for(&store, &key, &snap).await;
        assert!(second_plan.is_empty());
    }

    #[tokio::test]
    async fn test_added_resource_plans_only_the_new_one() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend::default();
        let key = StackKey::new("nonprod", "rbac");

        let initial = snapshot(vec![spec("rg-app"), spec("reader")]);
        let (plan, record, basis) = plan_for(&store, &key, &initial).await;
        Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        let extended = snapshot(vec![spec("rg-app"), spec("reader"), spec("writer")]);
        let (plan, _, _) = plan_for(&store, &key, &extended).await;

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].id.name, "writer");
        assert!(plan.to_update.is_empty());
        assert!(plan.to_delete.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_records_true_managed_set() {
        let store = MemoryStackStore::new();
        let key = StackKey::new("nonprod", "rbac");
        let a = spec("a");
        let b = spec("b");
        let c = spec("c");
        let backend = FakeBackend::failing_on(&c.id);
        let snap = snapshot(vec![a.clone(), b.clone(), c.clone()]);

        let (plan, record, basis) = plan_for(&store, &key, &snap).await;
        let err = Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect_err("must fail");
        assert!(matches!(err, DriftstackError::Apply(_)));

        // A and B are recorded as managed even though the apply failed.
        let stored = store.get(&key).await.expect("get").expect("record");
        assert!(stored.managed.contains_key(&a.id));
        assert!(stored.managed.contains_key(&b.id));
        assert!(!stored.managed.contains_key(&c.id));
        // The snapshot was not fully applied, so its hash is not recorded.
        assert_eq!(stored.last_snapshot_hash, None);

        // A retry plans only C.
        let (retry, _, _) = plan_for(&store, &key, &snap).await;
        assert_eq!(retry.to_create.len(), 1);
        assert_eq!(retry.to_create[0].id, c.id);
    }

    #[tokio::test]
    async fn test_deletes_run_after_creates() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend::default();
        let key = StackKey::new("nonprod", "rbac");

        let initial = snapshot(vec![spec("old")]);
        let (plan, record, basis) = plan_for(&store, &key, &initial).await;
        Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        let replaced = snapshot(vec![spec("new")]);
        let (plan, record, basis) = plan_for(&store, &key, &replaced).await;
        Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        let calls = backend.calls.lock().expect("calls lock");
        let create_pos = calls
            .iter()
            .position(|c| c.contains("create") && c.contains("new"))
            .expect("create call");
        let delete_pos = calls
            .iter()
            .position(|c| c.contains("delete") && c.contains("old"))
            .expect("delete call");
        assert!(create_pos < delete_pos, "calls were: {calls:?}");
    }

    #[tokio::test]
    async fn test_detach_removes_without_backend_call() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend::default();
        let key = StackKey::new("nonprod", "rbac");

        let initial = snapshot(vec![spec("kept"), spec("detached")]);
        let (plan, mut record, basis) = plan_for(&store, &key, &initial).await;
        record.unmanage_policy = UnmanagePolicy::Detach;
        Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        let reduced = snapshot(vec![spec("kept")]);
        let (plan, record, basis) = plan_for(&store, &key, &reduced).await;
        let result = Reconciler::new(&backend, &store)
            .apply(&key, &plan, record, basis)
            .await
            .expect("apply");

        assert_eq!(result.detached, 1);
        assert_eq!(result.deleted, 0);
        let calls = backend.calls.lock().expect("calls lock");
        assert!(
            !calls.iter().any(|c| c.starts_with("delete")),
            "calls were: {calls:?}"
        );
        let stored = store.get(&key).await.expect("get").expect("record");
        assert_eq!(stored.managed.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_recoverable_apply_error() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend {
            delay: Some(Duration::from_secs(5)),
            ..FakeBackend::default()
        };
        let key = StackKey::new("nonprod", "rbac");
        let snap = snapshot(vec![spec("slow")]);

        let (plan, record, basis) = plan_for(&store, &key, &snap).await;
        let err = Reconciler::new(&backend, &store)
            .with_op_deadline(Duration::from_millis(20))
            .apply(&key, &plan, record, basis)
            .await
            .expect_err("must time out");

        assert!(matches!(
            err,
            DriftstackError::Apply(ApplyError::DeadlineExpired { .. })
        ));
        assert!(err.is_recoverable());
        // Bookkeeping was still committed (nothing succeeded yet).
        assert!(store.get(&key).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_live_adoption_scenario() {
        let store = MemoryStackStore::new();
        let backend = FakeBackend::default();
        let key = StackKey::new("nonprod", "rbac");
        let a = spec("adopted");
        let snap = snapshot(vec![a.clone()]);

        let live = vec![LiveResource {
            id: a.id.clone(),
            spec_hash: String::from("drifted"),
        }];
        let plan = DiffEngine::new().plan(&snap, None, &live).expect("plan");
        assert_eq!(plan.to_update.len(), 1);

        Reconciler::new(&backend, &store)
            .apply(
                &key,
                &plan,
                StackRecord::new(UnmanagePolicy::Delete),
                PutBasis::Absent,
            )
            .await
            .expect("apply");

        let stored = store.get(&key).await.expect("get").expect("record");
        assert!(stored.managed.contains_key(&a.id));
    }
}
