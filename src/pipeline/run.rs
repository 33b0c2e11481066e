//! Pipeline run state.
//!
//! A run is one execution of a pipeline. Stage state carries enough to
//! resume idempotently: succeeded stages are skipped on re-execution, failed
//! and pending stages run again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::{PipelineSpec, StageSpec};

/// Lifecycle status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Suspended waiting for an operator signal.
    AwaitingApproval,
    /// Completed successfully.
    Succeeded,
    /// Completed with a failure.
    Failed,
    /// Skipped because the run was canceled before the stage started.
    Skipped,
}

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    /// The approval window elapsed without a signal.
    ApprovalTimeout,
    /// An operator rejected the stage.
    ApprovalRejected {
        /// Identity of the rejecting operator.
        approver: String,
        /// The stated reason.
        reason: String,
    },
    /// The stage's work errored.
    Error {
        /// Rendered error message.
        message: String,
    },
}

/// State of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    /// The stage specification.
    pub spec: StageSpec,
    /// Current status.
    pub status: StageStatus,
    /// When the stage started, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure detail, when `status` is `Failed`.
    pub failure: Option<StageFailure>,
    /// Who approved the stage, for approval stages.
    pub approved_by: Option<String>,
    /// When the approval signal arrived, for approval stages.
    pub approved_at: Option<DateTime<Utc>>,
}

/// One execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run id.
    pub run_id: Uuid,
    /// Name of the pipeline being run.
    pub pipeline: String,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// Per-stage state, in pipeline order.
    pub stages: Vec<StageState>,
}

impl StageState {
    fn new(spec: StageSpec) -> Self {
        Self {
            spec,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            failure: None,
            approved_by: None,
            approved_at: None,
        }
    }

    /// Records the approval signal on the stage.
    pub fn record_approval(&mut self, approver: &str) {
        self.approved_by = Some(approver.to_string());
        self.approved_at = Some(Utc::now());
    }

    /// Marks the stage as started.
    pub fn start(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
        self.failure = None;
    }

    /// Marks the stage as succeeded.
    pub fn succeed(&mut self) {
        self.status = StageStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the stage as failed with a reason.
    pub fn fail(&mut self, failure: StageFailure) {
        self.status = StageStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.failure = Some(failure);
    }

    /// Returns true if the stage still has work to do.
    #[must_use]
    pub const fn is_runnable(&self) -> bool {
        matches!(self.status, StageStatus::Pending | StageStatus::Failed)
    }
}

impl PipelineRun {
    /// Creates a fresh run of a pipeline, all stages pending.
    #[must_use]
    pub fn new(pipeline: &PipelineSpec) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.name.clone(),
            created_at: Utc::now(),
            stages: pipeline
                .stages
                .iter()
                .cloned()
                .map(StageState::new)
                .collect(),
        }
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.spec.id == id)
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status == StageStatus::Succeeded)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting approval",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fresh_run_is_all_pending() {
        let pipeline =
            PipelineSpec::promotion("release", &["dev", "prod"], Duration::from_secs(60))
                .expect("pipeline");
        let run = PipelineRun::new(&pipeline);

        assert_eq!(run.stages.len(), 5);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert!(!run.is_complete());
    }

    #[test]
    fn test_failed_stage_is_runnable_again() {
        let pipeline = PipelineSpec::promotion("release", &["dev"], Duration::from_secs(60))
            .expect("pipeline");
        let mut run = PipelineRun::new(&pipeline);

        run.stages[0].start();
        run.stages[0].fail(StageFailure::Error {
            message: String::from("backend unavailable"),
        });
        assert!(run.stages[0].is_runnable());

        run.stages[0].start();
        assert_eq!(run.stages[0].failure, None);
        run.stages[0].succeed();
        assert!(!run.stages[0].is_runnable());
    }
}
