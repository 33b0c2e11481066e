//! Declarative module definitions for the deployment graph.
//!
//! This module defines the structs that map to module definition files.
//! A module declares its identity, typed input parameters, dependency
//! references, and the resource templates it contributes to a snapshot.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of a module in the product -> service -> resource hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Leaf module contributing concrete resource templates.
    Resource,
    /// Composes resource modules into a deployable service.
    Service,
    /// Composes service modules into a product deployment.
    Product,
}

/// A declarative module definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleDefinition {
    /// Unique module name.
    pub name: String,
    /// Position in the module hierarchy.
    pub kind: ModuleKind,
    /// Module version. Immutable once tagged; changes require a version bump.
    pub version: Version,
    /// Typed input parameters this module accepts.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Dependencies on other modules, by name and version range.
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    /// Resource templates this module contributes.
    #[serde(default)]
    pub resources: Vec<ResourceTemplate>,
}

/// A typed input parameter declared by a module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Whether the instantiating parent must supply a value.
    #[serde(default)]
    pub required: bool,
    /// Default value used when the parameter is optional and unsupplied.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A dependency reference to another module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyRef {
    /// Name of the depended-on module.
    pub name: String,
    /// Acceptable version range.
    pub range: VersionReq,
    /// Parameter bindings supplied to the child module.
    #[serde(default)]
    pub parameters: BTreeMap<String, Binding>,
}

/// A value bound to a child parameter or a template property.
///
/// Either a literal JSON value or a reference to a parameter of the
/// enclosing module, written as `{ from: <parameter-name> }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Binding {
    /// Reference to a parameter of the enclosing module.
    Ref {
        /// The referenced parameter name.
        from: String,
    },
    /// A literal value.
    Literal(serde_json::Value),
}

/// A resource template contributed by a module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceTemplate {
    /// Logical resource name.
    pub name: String,
    /// Resource type identifier (backend-specific, opaque to the core).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Declared properties; bindings are evaluated against the module's
    /// effective parameters during resolution.
    #[serde(default)]
    pub properties: BTreeMap<String, Binding>,
}

/// A reference to a module by name and acceptable version range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleRef {
    /// Module name.
    pub name: String,
    /// Acceptable version range.
    pub range: VersionReq,
}

impl ModuleRef {
    /// Creates a reference to any version of the named module.
    #[must_use]
    pub fn any(name: &str) -> Self {
        Self {
            name: name.to_string(),
            range: VersionReq::STAR,
        }
    }

    /// Creates a reference with an explicit version range.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not a valid semver range; intended for literals.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_range(name: &str, range: &str) -> Self {
        Self {
            name: name.to_string(),
            range: VersionReq::parse(range).expect("invalid version range literal"),
        }
    }
}

impl ModuleKind {
    /// Returns true if a module of this kind may depend on `child`.
    ///
    /// Products compose services; services compose resources and other
    /// services; resources are leaves with no further dependencies.
    #[must_use]
    pub const fn may_depend_on(self, child: Self) -> bool {
        match self {
            Self::Product => matches!(child, Self::Service),
            Self::Service => matches!(child, Self::Service | Self::Resource),
            Self::Resource => false,
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Product => "product",
            Self::Service => "service",
            Self::Resource => "resource",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_layering() {
        assert!(ModuleKind::Product.may_depend_on(ModuleKind::Service));
        assert!(!ModuleKind::Product.may_depend_on(ModuleKind::Resource));
        assert!(ModuleKind::Service.may_depend_on(ModuleKind::Resource));
        assert!(ModuleKind::Service.may_depend_on(ModuleKind::Service));
        assert!(!ModuleKind::Resource.may_depend_on(ModuleKind::Resource));
    }

    #[test]
    fn test_binding_yaml_forms() {
        let literal: Binding = serde_yaml::from_str("\"westeurope\"").expect("literal");
        assert_eq!(
            literal,
            Binding::Literal(serde_json::Value::String(String::from("westeurope")))
        );

        let reference: Binding = serde_yaml::from_str("{ from: environment }").expect("ref");
        assert_eq!(
            reference,
            Binding::Ref {
                from: String::from("environment")
            }
        );
    }

    #[test]
    fn test_module_definition_yaml() {
        let yaml = r"
name: iam-resources
kind: service
version: 1.0.0
parameters:
  - name: environment
    required: true
dependencies:
  - name: rg
    range: '^1.0'
    parameters:
      environment: { from: environment }
";
        let def: ModuleDefinition = serde_yaml::from_str(yaml).expect("module yaml");
        assert_eq!(def.name, "iam-resources");
        assert_eq!(def.kind, ModuleKind::Service);
        assert_eq!(def.dependencies.len(), 1);
        assert!(def.dependencies[0].range.matches(&Version::new(1, 0, 3)));
    }
}
