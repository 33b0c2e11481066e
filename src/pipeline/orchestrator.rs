//! Stage orchestrator.
//!
//! Executes a pipeline run stage by stage. Failures are fail-fast: the
//! failing stage is recorded and later stages stay pending, so re-executing
//! the same run resumes from the failure. Approval stages suspend on a
//! oneshot channel registered with the [`ApprovalHub`] and fail on timeout.
//! Cancellation is cooperative: it takes effect between stages, interrupts
//! approval waits, and is handed to running stages as a watch receiver so
//! executors can interrupt in-flight work at their own safe points.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DriftstackError, Result, RunError};
use crate::planner::Plan;
use crate::reconciler::ApplyResult;

use super::run::{PipelineRun, StageFailure, StageStatus};
use super::stage::{StageKind, StageSpec};

/// Executes the work behind preview and apply stages.
///
/// Implementations bind an orchestrator to a concrete stack: they resolve
/// the snapshot, plan, and reconcile for the named environment.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Computes the plan for an environment without applying it.
    ///
    /// `cancel` flips to `true` when cancellation of the run is requested;
    /// implementations may watch it to stop early.
    async fn preview(&self, environment: &str, cancel: watch::Receiver<bool>) -> Result<Plan>;

    /// Converges an environment to its desired snapshot.
    ///
    /// `cancel` flips to `true` when cancellation of the run is requested;
    /// implementations may watch it to stop between operations.
    async fn apply(&self, environment: &str, cancel: watch::Receiver<bool>)
        -> Result<ApplyResult>;
}

/// An operator's answer to a pending approval.
#[derive(Debug, Clone)]
pub enum ApprovalDecision {
    /// Proceed with the run.
    Approved {
        /// Identity of the approving operator.
        approver: String,
    },
    /// Stop the run.
    Rejected {
        /// Identity of the rejecting operator.
        approver: String,
        /// The stated reason.
        reason: String,
    },
}

/// Routes approval signals to suspended runs.
///
/// One hub can serve many concurrent runs; pending approvals are keyed by
/// (run id, stage id).
#[derive(Default)]
pub struct ApprovalHub {
    pending: Mutex<HashMap<(Uuid, String), oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalHub {
    /// Creates a new hub with no pending approvals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Approves a pending stage.
    ///
    /// # Errors
    ///
    /// Fails with `NoPendingApproval` if the stage is not awaiting approval.
    pub async fn approve(&self, run_id: Uuid, stage: &str, approver: &str) -> Result<()> {
        self.resolve(
            run_id,
            stage,
            ApprovalDecision::Approved {
                approver: approver.to_string(),
            },
        )
        .await
    }

    /// Rejects a pending stage.
    ///
    /// # Errors
    ///
    /// Fails with `NoPendingApproval` if the stage is not awaiting approval.
    pub async fn reject(&self, run_id: Uuid, stage: &str, approver: &str, reason: &str) -> Result<()> {
        self.resolve(
            run_id,
            stage,
            ApprovalDecision::Rejected {
                approver: approver.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn resolve(&self, run_id: Uuid, stage: &str, decision: ApprovalDecision) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .await
            .remove(&(run_id, stage.to_string()));
        let Some(sender) = sender else {
            return Err(DriftstackError::Run(RunError::NoPendingApproval {
                run_id: run_id.to_string(),
                stage: stage.to_string(),
            }));
        };
        // The waiter may have timed out between our removal and this send;
        // the run has already recorded the timeout in that case.
        let _ = sender.send(decision);
        Ok(())
    }

    async fn register(&self, run_id: Uuid, stage: &str) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert((run_id, stage.to_string()), tx);
        rx
    }

    async fn forget(&self, run_id: Uuid, stage: &str) {
        self.pending
            .lock()
            .await
            .remove(&(run_id, stage.to_string()));
    }
}

/// Handle for requesting cooperative cancellation of a run.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Takes effect before the next stage starts,
    /// or immediately for a stage suspended on approval.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Drives pipeline runs over a stage executor.
pub struct Orchestrator<E: StageExecutor> {
    executor: E,
    approvals: Arc<ApprovalHub>,
    cancel_rx: watch::Receiver<bool>,
}

impl<E: StageExecutor> Orchestrator<E> {
    /// Creates an orchestrator and the cancel handle for its runs.
    #[must_use]
    pub fn new(executor: E) -> (Self, CancelHandle) {
        let (tx, cancel_rx) = watch::channel(false);
        let orchestrator = Self {
            executor,
            approvals: Arc::new(ApprovalHub::new()),
            cancel_rx,
        };
        (orchestrator, CancelHandle { tx })
    }

    /// Returns the approval hub serving this orchestrator's runs.
    #[must_use]
    pub fn approvals(&self) -> Arc<ApprovalHub> {
        Arc::clone(&self.approvals)
    }

    /// Executes a run to completion, failure, or cancellation.
    ///
    /// Stages already succeeded are skipped, so re-executing a failed run
    /// resumes at the stage that failed.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage; the run records which
    /// stage failed and why.
    pub async fn execute(&self, run: &mut PipelineRun) -> Result<()> {
        info!("Executing run {} of pipeline '{}'", run.run_id, run.pipeline);
        let mut cancel = self.cancel_rx.clone();
        let run_id = run.run_id;

        for index in 0..run.stages.len() {
            if *cancel.borrow() {
                return Self::cancel_remaining(run, index);
            }
            if run.stages[index].status == StageStatus::Succeeded {
                info!("Stage '{}' already succeeded, skipping", run.stages[index].spec.id);
                continue;
            }

            let spec = run.stages[index].spec.clone();
            run.stages[index].start();
            info!("Stage '{}' ({}) started", spec.id, spec.kind);

            let outcome = match spec.kind {
                StageKind::Preview | StageKind::Apply => self.run_work(&spec).await,
                StageKind::Approval => {
                    run.stages[index].status = StageStatus::AwaitingApproval;
                    self.wait_for_approval(run_id, &spec, &mut cancel).await
                }
            };

            match outcome {
                Ok(approved_by) => {
                    if let Some(approver) = approved_by {
                        run.stages[index].record_approval(&approver);
                    }
                    run.stages[index].succeed();
                    info!("Stage '{}' succeeded", spec.id);
                }
                Err(err) => {
                    if let DriftstackError::Run(RunError::Canceled { .. }) = &err {
                        return Self::cancel_remaining(run, index);
                    }
                    warn!("Stage '{}' failed: {err}", spec.id);
                    run.stages[index].fail(Self::failure_for(&err));
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Runs a preview or apply stage; returns no approver.
    async fn run_work(&self, spec: &StageSpec) -> Result<Option<String>> {
        let environment = spec.environment.as_deref().unwrap_or_default();
        match spec.kind {
            StageKind::Preview => {
                let plan = self
                    .executor
                    .preview(environment, self.cancel_rx.clone())
                    .await?;
                info!("Preview for '{environment}':\n{plan}");
            }
            StageKind::Apply => {
                let result = self
                    .executor
                    .apply(environment, self.cancel_rx.clone())
                    .await?;
                info!("Apply for '{environment}': {result}");
            }
            StageKind::Approval => {}
        }
        Ok(None)
    }

    /// Suspends until approval, rejection, timeout, or cancellation.
    async fn wait_for_approval(
        &self,
        run_id: Uuid,
        spec: &StageSpec,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<String>> {
        let timeout = spec
            .approval_timeout()
            .ok_or_else(|| DriftstackError::Run(RunError::InvalidPipeline {
                pipeline: String::new(),
                message: format!("approval stage '{}' has no timeout", spec.id),
            }))?;
        let rx = self.approvals.register(run_id, &spec.id).await;
        info!(
            "Stage '{}' awaiting approval (timeout {}s)",
            spec.id,
            timeout.as_secs()
        );

        let decision = tokio::select! {
            decision = rx => decision.ok(),
            () = tokio::time::sleep(timeout) => {
                self.approvals.forget(run_id, &spec.id).await;
                return Err(DriftstackError::Run(RunError::ApprovalTimeout {
                    stage: spec.id.clone(),
                    timeout_secs: timeout.as_secs(),
                }));
            }
            _ = cancel.changed() => {
                self.approvals.forget(run_id, &spec.id).await;
                return Err(DriftstackError::Run(RunError::Canceled {
                    stage: spec.id.clone(),
                }));
            }
        };

        match decision {
            Some(ApprovalDecision::Approved { approver }) => Ok(Some(approver)),
            Some(ApprovalDecision::Rejected { approver, reason }) => {
                Err(DriftstackError::Run(RunError::ApprovalRejected {
                    stage: spec.id.clone(),
                    approver,
                    reason,
                }))
            }
            // Sender dropped without a decision; treat as cancellation.
            None => Err(DriftstackError::Run(RunError::Canceled {
                stage: spec.id.clone(),
            })),
        }
    }

    /// Marks the current and remaining runnable stages skipped.
    fn cancel_remaining(run: &mut PipelineRun, from: usize) -> Result<()> {
        let stage_id = run.stages[from].spec.id.clone();
        warn!("Run {} canceled at stage '{stage_id}'", run.run_id);
        for stage in run.stages.iter_mut().skip(from) {
            if stage.status != StageStatus::Succeeded {
                stage.status = StageStatus::Skipped;
            }
        }
        Err(DriftstackError::Run(RunError::Canceled { stage: stage_id }))
    }

    fn failure_for(err: &DriftstackError) -> StageFailure {
        match err {
            DriftstackError::Run(RunError::ApprovalTimeout { .. }) => StageFailure::ApprovalTimeout,
            DriftstackError::Run(RunError::ApprovalRejected {
                approver, reason, ..
            }) => StageFailure::ApprovalRejected {
                approver: approver.clone(),
                reason: reason.clone(),
            },
            other => StageFailure::Error {
                message: other.to_string(),
            },
        }
    }
}
