//! Stage pipelines: specifications, run state, and the orchestrator that
//! drives runs through approval gates.

mod orchestrator;
mod run;
mod stage;

pub use orchestrator::{ApprovalDecision, ApprovalHub, CancelHandle, Orchestrator, StageExecutor};
pub use run::{PipelineRun, StageFailure, StageState, StageStatus};
pub use stage::{PipelineSpec, StageKind, StageSpec};
