//! Stack definition files.
//!
//! A stack file names one deployable stack: which root module to resolve,
//! with which parameters, against which module registry, into which
//! environment and scope. It is the only input the CLI driver needs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DriftstackError, Result};
use crate::graph::{ModuleRef, ResolveRequest};
use crate::state::{StackKey, StackRecord, UnmanagePolicy};

/// Default stack file name searched for in the working directory.
pub const STACK_FILE_NAME: &str = "driftstack.stack.yaml";

/// A parsed stack definition file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackFile {
    /// Stack identity and target.
    pub stack: StackSection,
    /// Root module to resolve.
    pub root: RootSection,
    /// Relative path of the module registry directory.
    pub registry: PathBuf,
    /// Policy for managed resources that fall out of scope.
    #[serde(default)]
    pub unmanage_policy: UnmanagePolicy,
    /// Optional custom state directory (defaults to `.driftstack`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

/// Stack identity: name, environment, and provisioning scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackSection {
    /// Stack name.
    pub name: String,
    /// Environment name.
    pub environment: String,
    /// Scope path resources are provisioned under.
    pub scope: String,
}

/// Root module reference and the parameters supplied to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootSection {
    /// Root module name.
    pub module: String,
    /// Acceptable version range.
    pub range: semver::VersionReq,
    /// Parameter values supplied to the root module.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl StackFile {
    /// Loads and parses a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DriftstackError::internal(format!(
                "Cannot read stack file {}: {e}",
                path.display()
            ))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            DriftstackError::internal(format!(
                "Cannot parse stack file {}: {e}",
                path.display()
            ))
        })
    }

    /// The state store key for this stack.
    #[must_use]
    pub fn key(&self) -> StackKey {
        StackKey::new(&self.stack.environment, &self.stack.name)
    }

    /// The resolve request corresponding to this stack file.
    #[must_use]
    pub fn resolve_request(&self) -> ResolveRequest {
        ResolveRequest {
            root: ModuleRef {
                name: self.root.module.clone(),
                range: self.root.range.clone(),
            },
            parameters: self.root.parameters.clone(),
            environment: self.stack.environment.clone(),
            scope: self.stack.scope.clone(),
        }
    }

    /// The record to plan against, carrying the file's unmanage policy.
    ///
    /// Starts from the stored record when one exists and an empty record
    /// otherwise. The stack file is declarative, so its policy overrides
    /// whatever policy the record was last written with.
    #[must_use]
    pub fn effective_record(&self, stored: Option<StackRecord>) -> StackRecord {
        let mut record = stored.unwrap_or_else(|| StackRecord::new(self.unmanage_policy));
        record.unmanage_policy = self.unmanage_policy;
        record
    }

    /// Registry directory, resolved relative to the stack file's directory.
    #[must_use]
    pub fn registry_dir(&self, stack_file: &Path) -> PathBuf {
        resolve_relative(stack_file, &self.registry)
    }

    /// State directory, resolved relative to the stack file's directory.
    #[must_use]
    pub fn resolved_state_dir(&self, stack_file: &Path) -> PathBuf {
        self.state_dir.as_ref().map_or_else(
            || resolve_relative(stack_file, Path::new(".driftstack")),
            |dir| resolve_relative(stack_file, dir),
        )
    }
}

fn resolve_relative(stack_file: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        stack_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(path)
    }
}

/// Finds the stack file: an explicit path wins, otherwise the default name
/// in the working directory.
///
/// # Errors
///
/// Returns an error if no stack file can be found.
pub fn find_stack_file(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let default = PathBuf::from(STACK_FILE_NAME);
    if default.exists() {
        return Ok(default);
    }
    Err(DriftstackError::internal(format!(
        "No stack file found; expected {STACK_FILE_NAME} in the current directory (or pass --stack)"
    )))
}
