//! Pipeline and stage specifications.
//!
//! A pipeline is an ordered list of stages. Preview and apply stages target
//! one environment each; approval stages gate the stages after them behind
//! an operator signal with a timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DriftstackError, Result, RunError};

/// What a stage does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Compute and render a plan without touching infrastructure.
    Preview,
    /// Converge the target environment to the desired snapshot.
    Apply,
    /// Suspend the run until an operator approves or rejects.
    Approval,
}

/// Specification of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Unique stage id within the pipeline.
    pub id: String,
    /// What the stage does.
    pub kind: StageKind,
    /// Target environment, for preview and apply stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// How long an approval stage waits for a signal, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout_secs: Option<u64>,
}

/// An ordered pipeline of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name.
    pub name: String,
    /// Stages in execution order.
    pub stages: Vec<StageSpec>,
}

impl StageSpec {
    /// Creates a preview stage for an environment.
    #[must_use]
    pub fn preview(id: &str, environment: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: StageKind::Preview,
            environment: Some(environment.to_string()),
            approval_timeout_secs: None,
        }
    }

    /// Creates an apply stage for an environment.
    #[must_use]
    pub fn apply(id: &str, environment: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: StageKind::Apply,
            environment: Some(environment.to_string()),
            approval_timeout_secs: None,
        }
    }

    /// Creates an approval stage with a timeout.
    #[must_use]
    pub fn approval(id: &str, timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            kind: StageKind::Approval,
            environment: None,
            approval_timeout_secs: Some(timeout.as_secs()),
        }
    }

    /// Returns the approval timeout as a duration.
    #[must_use]
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }
}

impl PipelineSpec {
    /// Creates a pipeline from explicit stages.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidPipeline` if the stage list is malformed.
    pub fn new(name: &str, stages: Vec<StageSpec>) -> Result<Self> {
        let pipeline = Self {
            name: name.to_string(),
            stages,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Builds the standard promotion chain over an ordered environment list:
    /// preview and apply for the first environment, then an approval gate
    /// before each subsequent environment's apply.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidPipeline` if `environments` is empty.
    pub fn promotion(name: &str, environments: &[&str], approval_timeout: Duration) -> Result<Self> {
        if environments.is_empty() {
            return Err(DriftstackError::Run(RunError::InvalidPipeline {
                pipeline: name.to_string(),
                message: String::from("promotion chain needs at least one environment"),
            }));
        }

        let mut stages = Vec::new();
        for (index, environment) in environments.iter().enumerate() {
            if index > 0 {
                stages.push(StageSpec::approval(
                    &format!("approve-{environment}"),
                    approval_timeout,
                ));
            }
            stages.push(StageSpec::preview(
                &format!("preview-{environment}"),
                environment,
            ));
            stages.push(StageSpec::apply(&format!("apply-{environment}"), environment));
        }
        Self::new(name, stages)
    }

    fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return self.invalid("pipeline has no stages");
        }

        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                return self.invalid(&format!("duplicate stage id '{}'", stage.id));
            }
            match stage.kind {
                StageKind::Preview | StageKind::Apply => {
                    if stage.environment.is_none() {
                        return self
                            .invalid(&format!("stage '{}' has no target environment", stage.id));
                    }
                }
                StageKind::Approval => {
                    if stage.approval_timeout_secs.is_none() {
                        return self
                            .invalid(&format!("approval stage '{}' has no timeout", stage.id));
                    }
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, message: &str) -> Result<()> {
        Err(DriftstackError::Run(RunError::InvalidPipeline {
            pipeline: self.name.clone(),
            message: message.to_string(),
        }))
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preview => "preview",
            Self::Apply => "apply",
            Self::Approval => "approval",
        };
        write!(f, "{s}")
    }
}
