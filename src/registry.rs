//! File-backed driver adapters: the module registry and a scope listing.
//!
//! [`DirModuleSource`] loads every `*.yaml` / `*.yml` file under a directory
//! as a module definition and serves them through [`ModuleSource`]. Multiple
//! versions of a module coexist as separate files; resolution picks the
//! highest version matching the requested range. [`FileScopeQuery`] serves a
//! captured live-scope listing from a JSON file for offline previews.

use async_trait::async_trait;
use semver::{Version, VersionReq};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::{LiveResource, ModuleSource, ScopeQuery};
use crate::error::{DriftstackError, GraphError, RegistryError, Result};
use crate::graph::ModuleDefinition;

/// Module source reading definitions from a local directory.
#[derive(Debug)]
pub struct DirModuleSource {
    /// Loaded definitions, by module name.
    modules: HashMap<String, Vec<ModuleDefinition>>,
}

impl DirModuleSource {
    /// Loads all module definitions under `base_dir`.
    ///
    /// # Errors
    ///
    /// Fails with `DirNotFound` if the directory is missing, `ParseError` for
    /// unreadable definitions, and `DuplicateModule` when two files declare
    /// the same name and version.
    pub fn load(base_dir: &Path) -> Result<Self> {
        if !base_dir.is_dir() {
            return Err(DriftstackError::Registry(RegistryError::DirNotFound {
                path: base_dir.to_path_buf(),
            }));
        }

        let mut modules: HashMap<String, Vec<ModuleDefinition>> = HashMap::new();
        let mut count = 0_usize;
        for entry in std::fs::read_dir(base_dir)? {
            let path = entry?.path();
            if !is_definition_file(&path) {
                continue;
            }
            let definition = parse_definition(&path)?;
            debug!(
                "Loaded module {}@{} from {}",
                definition.name,
                definition.version,
                path.display()
            );

            let versions = modules.entry(definition.name.clone()).or_default();
            if versions.iter().any(|m| m.version == definition.version) {
                return Err(DriftstackError::Registry(RegistryError::DuplicateModule {
                    module: definition.name,
                    version: definition.version,
                }));
            }
            versions.push(definition);
            count += 1;
        }

        info!(
            "Module registry loaded: {count} definition(s) from {}",
            base_dir.display()
        );
        Ok(Self { modules })
    }

    /// Returns all loaded module names, sorted.
    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the versions available for a module, sorted ascending.
    #[must_use]
    pub fn versions_of(&self, name: &str) -> Vec<&Version> {
        let mut versions: Vec<&Version> = self
            .modules
            .get(name)
            .map(|defs| defs.iter().map(|d| &d.version).collect())
            .unwrap_or_default();
        versions.sort_unstable();
        versions
    }
}

fn is_definition_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml")
}

fn parse_definition(path: &Path) -> Result<ModuleDefinition> {
    let text = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|e| {
        DriftstackError::Registry(RegistryError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    })
}

#[async_trait]
impl ModuleSource for DirModuleSource {
    async fn resolve_module(&self, name: &str, range: &VersionReq) -> Result<ModuleDefinition> {
        self.modules
            .get(name)
            .and_then(|defs| {
                defs.iter()
                    .filter(|d| range.matches(&d.version))
                    .max_by(|a, b| a.version.cmp(&b.version))
            })
            .cloned()
            .ok_or_else(|| {
                DriftstackError::Graph(GraphError::UnresolvedReference {
                    module: name.to_string(),
                    range: range.clone(),
                })
            })
    }
}

/// Scope query serving a captured live-resource listing from a JSON file.
///
/// Stands in for a cloud adapter when previewing plans offline: the file
/// holds a JSON array of live resources, and queries return the entries
/// whose id falls under the requested scope.
#[derive(Debug)]
pub struct FileScopeQuery {
    /// Path of the JSON listing.
    path: PathBuf,
}

impl FileScopeQuery {
    /// Creates a scope query over a JSON listing file.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ScopeQuery for FileScopeQuery {
    async fn query_resources(&self, scope: &str) -> Result<Vec<LiveResource>> {
        let text = std::fs::read_to_string(&self.path)?;
        let listed: Vec<LiveResource> = serde_json::from_str(&text).map_err(|e| {
            DriftstackError::internal(format!(
                "Cannot parse live scope listing {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(listed
            .into_iter()
            .filter(|r| r.id.scope == scope)
            .collect())
    }
}
