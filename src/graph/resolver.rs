//! Module graph resolution.
//!
//! Resolves a root module reference into a desired-state snapshot: modules
//! are fetched from the module source, versions are pinned per deployment,
//! parameters are propagated explicitly from parent to child, and resource
//! templates are evaluated bottom-up (resources before services before the
//! product). Resolution never touches live infrastructure.

use semver::Version;
use std::collections::BTreeMap;
use std::collections::HashMap;
use tracing::debug;

use crate::backend::ModuleSource;
use crate::error::{DriftstackError, GraphError, Result};

use super::module::{Binding, ModuleDefinition, ModuleKind, ModuleRef};
use super::snapshot::{ResourceId, ResourceSpec, Snapshot};

/// Resolver for module graphs.
#[derive(Debug)]
pub struct Resolver<'a, S: ModuleSource> {
    /// Source of module definitions.
    source: &'a S,
}

/// A resolution request for one (environment, scope) pair.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Root module to resolve (normally a product module).
    pub root: ModuleRef,
    /// Concrete parameter values supplied to the root module.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Target environment.
    pub environment: String,
    /// Target scope path.
    pub scope: String,
}

/// Version selections pinned during one resolution.
///
/// The first edge to reach a module pins its version; later edges must be
/// satisfiable by the pinned version or resolution fails.
#[derive(Debug, Default)]
struct VersionPins {
    selected: HashMap<String, (Version, String)>,
}

impl VersionPins {
    /// Records or checks a selection; `requester` names the depending module.
    fn pin(
        &mut self,
        module: &str,
        version: &Version,
        range: &semver::VersionReq,
        requester: &str,
    ) -> Result<()> {
        if let Some((selected, _)) = self.selected.get(module) {
            if !range.matches(selected) {
                return Err(DriftstackError::Graph(GraphError::VersionConflict {
                    module: module.to_string(),
                    selected: selected.clone(),
                    requester: requester.to_string(),
                    range: range.clone(),
                }));
            }
            return Ok(());
        }
        self.selected
            .insert(module.to_string(), (version.clone(), requester.to_string()));
        Ok(())
    }

    fn selected(&self, module: &str) -> Option<&Version> {
        self.selected.get(module).map(|(v, _)| v)
    }
}

impl<'a, S: ModuleSource> Resolver<'a, S> {
    /// Creates a new resolver over the given module source.
    #[must_use]
    pub const fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Resolves the request into a desired-state snapshot.
    ///
    /// Resolution is deterministic: identical graphs and parameters always
    /// produce a snapshot with an identical content hash.
    ///
    /// # Errors
    ///
    /// Fails with a [`GraphError`] on cycles, version conflicts, unresolved
    /// references, missing required parameters, or hierarchy violations.
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Snapshot> {
        debug!(
            "Resolving {} for {}/{}",
            request.root, request.environment, request.scope
        );

        let mut pins = VersionPins::default();
        let mut visiting: Vec<String> = Vec::new();
        let mut resources: Vec<ResourceSpec> = Vec::new();

        let root = self
            .resolve_node(
                &request.root,
                &request.parameters,
                &request.scope,
                &mut pins,
                &mut visiting,
                &mut resources,
            )
            .await?;

        let root_module = format!("{}@{}", root.0, root.1);
        debug!(
            "Resolved {} -> {} resource specification(s)",
            root_module,
            resources.len()
        );

        Ok(Snapshot::assemble(
            &request.environment,
            &request.scope,
            &root_module,
            resources,
        ))
    }

    /// Resolves one module node and, recursively, its dependency subtree.
    ///
    /// Children are resolved before the parent's own resource templates are
    /// evaluated, so the snapshot lists leaves first. Returns the resolved
    /// (name, version) pair.
    async fn resolve_node(
        &self,
        reference: &ModuleRef,
        supplied: &BTreeMap<String, serde_json::Value>,
        scope: &str,
        pins: &mut VersionPins,
        visiting: &mut Vec<String>,
        resources: &mut Vec<ResourceSpec>,
    ) -> Result<(String, Version)> {
        if visiting.iter().any(|m| m == &reference.name) {
            let mut cycle: Vec<&str> = visiting.iter().map(String::as_str).collect();
            cycle.push(&reference.name);
            return Err(DriftstackError::Graph(GraphError::CyclicDependency {
                cycle: cycle.join(" -> "),
            }));
        }

        let definition = self
            .source
            .resolve_module(&reference.name, &reference.range)
            .await?;

        let requester = visiting.last().cloned().unwrap_or_else(|| String::from("<root>"));
        let was_pinned = pins.selected(&definition.name).is_some();
        pins.pin(&definition.name, &definition.version, &reference.range, &requester)?;

        // A module reached through several edges contributes its subtree
        // exactly once; later edges only undergo the version check above.
        if was_pinned {
            let pinned = pins
                .selected(&definition.name)
                .cloned()
                .unwrap_or(definition.version);
            return Ok((definition.name, pinned));
        }

        let effective = Self::effective_parameters(&definition, supplied)?;

        visiting.push(definition.name.clone());

        for dependency in &definition.dependencies {
            Self::check_hierarchy(&definition, dependency, self.peek_kind(dependency).await)?;

            let child_params = Self::bind_parameters(
                &definition.name,
                &dependency.parameters,
                &effective,
            )?;
            let child_ref = ModuleRef {
                name: dependency.name.clone(),
                range: dependency.range.clone(),
            };
            Box::pin(self.resolve_node(
                &child_ref,
                &child_params,
                scope,
                pins,
                visiting,
                resources,
            ))
            .await?;
        }

        for template in &definition.resources {
            let mut properties = BTreeMap::new();
            for (field, binding) in &template.properties {
                let value = Self::eval_binding(&definition.name, binding, &effective)?;
                properties.insert(field.clone(), value);
            }
            resources.push(ResourceSpec {
                id: ResourceId::new(scope, &template.resource_type, &template.name),
                properties,
            });
        }

        visiting.pop();

        Ok((definition.name, definition.version))
    }

    /// Looks up the kind of a dependency for hierarchy validation.
    async fn peek_kind(&self, dependency: &super::module::DependencyRef) -> Option<ModuleKind> {
        self.source
            .resolve_module(&dependency.name, &dependency.range)
            .await
            .ok()
            .map(|d| d.kind)
    }

    /// Enforces the product -> service -> resource layering.
    fn check_hierarchy(
        parent: &ModuleDefinition,
        dependency: &super::module::DependencyRef,
        child_kind: Option<ModuleKind>,
    ) -> Result<()> {
        let Some(child_kind) = child_kind else {
            // Unresolvable dependency surfaces as UnresolvedReference when
            // the child is actually resolved; nothing to validate here.
            return Ok(());
        };
        if parent.kind.may_depend_on(child_kind) {
            return Ok(());
        }
        Err(DriftstackError::Graph(GraphError::InvalidHierarchy {
            module: parent.name.clone(),
            kind: parent.kind.to_string(),
            dependency: dependency.name.clone(),
            dependency_kind: child_kind.to_string(),
        }))
    }

    /// Computes the effective parameter set of a module instantiation.
    ///
    /// Defaults apply first, then supplied values override. Every required
    /// parameter must be supplied by the instantiating parent.
    fn effective_parameters(
        definition: &ModuleDefinition,
        supplied: &BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut effective = BTreeMap::new();

        for spec in &definition.parameters {
            match supplied.get(&spec.name) {
                Some(value) => {
                    effective.insert(spec.name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &spec.default {
                        effective.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(DriftstackError::Graph(GraphError::MissingParameter {
                            module: definition.name.clone(),
                            parameter: spec.name.clone(),
                        }));
                    }
                }
            }
        }

        Ok(effective)
    }

    /// Evaluates the parameter bindings for a child instantiation.
    fn bind_parameters(
        module: &str,
        bindings: &BTreeMap<String, Binding>,
        effective: &BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut bound = BTreeMap::new();
        for (name, binding) in bindings {
            bound.insert(name.clone(), Self::eval_binding(module, binding, effective)?);
        }
        Ok(bound)
    }

    /// Evaluates a single binding against the module's effective parameters.
    fn eval_binding(
        module: &str,
        binding: &Binding,
        effective: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match binding {
            Binding::Literal(value) => Ok(value.clone()),
            Binding::Ref { from } => effective.get(from).cloned().ok_or_else(|| {
                DriftstackError::Graph(GraphError::UnknownReference {
                    module: module.to_string(),
                    reference: from.clone(),
                })
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::module::{DependencyRef, ParameterSpec, ResourceTemplate};
    use async_trait::async_trait;
    use semver::VersionReq;

    /// In-memory module source for resolver tests.
    struct FixtureSource {
        modules: Vec<ModuleDefinition>,
    }

    #[async_trait]
    impl ModuleSource for FixtureSource {
        async fn resolve_module(
            &self,
            name: &str,
            range: &VersionReq,
        ) -> Result<ModuleDefinition> {
            self.modules
                .iter()
                .filter(|m| m.name == name && range.matches(&m.version))
                .max_by(|a, b| a.version.cmp(&b.version))
                .cloned()
                .ok_or_else(|| {
                    DriftstackError::Graph(GraphError::UnresolvedReference {
                        module: name.to_string(),
                        range: range.clone(),
                    })
                })
        }
    }

    fn param(name: &str, required: bool) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            required,
            default: None,
            description: None,
        }
    }

    fn dep(name: &str, bindings: &[(&str, Binding)]) -> DependencyRef {
        DependencyRef {
            name: name.to_string(),
            range: VersionReq::parse("^1.0").expect("range"),
            parameters: bindings
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        }
    }

    fn from(parameter: &str) -> Binding {
        Binding::Ref {
            from: parameter.to_string(),
        }
    }

    fn resource_module(name: &str, template_name: &str, resource_type: &str) -> ModuleDefinition {
        ModuleDefinition {
            name: name.to_string(),
            kind: ModuleKind::Resource,
            version: Version::new(1, 0, 0),
            parameters: vec![param("environment", true)],
            dependencies: vec![],
            resources: vec![ResourceTemplate {
                name: template_name.to_string(),
                resource_type: resource_type.to_string(),
                properties: [(String::from("environment"), from("environment"))]
                    .into_iter()
                    .collect(),
            }],
        }
    }

    /// The rbac product graph from the conventions:
    /// product:rbac -> service:iam-resources -> {resource:rg, resource:role-assignment}.
    fn rbac_fixture() -> FixtureSource {
        let rg = resource_module("rg", "rg-app", "resource-group");
        let role = resource_module("role-assignment", "reader", "role-assignment");
        let service = ModuleDefinition {
            name: String::from("iam-resources"),
            kind: ModuleKind::Service,
            version: Version::new(1, 0, 0),
            parameters: vec![param("environment", true)],
            dependencies: vec![
                dep("rg", &[("environment", from("environment"))]),
                dep("role-assignment", &[("environment", from("environment"))]),
            ],
            resources: vec![],
        };
        let product = ModuleDefinition {
            name: String::from("rbac"),
            kind: ModuleKind::Product,
            version: Version::new(1, 0, 0),
            parameters: vec![param("environment", true)],
            dependencies: vec![dep(
                "iam-resources",
                &[("environment", from("environment"))],
            )],
            resources: vec![],
        };
        FixtureSource {
            modules: vec![rg, role, service, product],
        }
    }

    fn rbac_request() -> ResolveRequest {
        ResolveRequest {
            root: ModuleRef::with_range("rbac", "^1.0"),
            parameters: [(
                String::from("environment"),
                serde_json::Value::String(String::from("nonprod")),
            )]
            .into_iter()
            .collect(),
            environment: String::from("nonprod"),
            scope: String::from("sub/nonprod"),
        }
    }

    #[tokio::test]
    async fn test_rbac_graph_resolves_two_resources() {
        let source = rbac_fixture();
        let resolver = Resolver::new(&source);

        let snapshot = resolver.resolve(&rbac_request()).await.expect("resolve");

        assert_eq!(snapshot.resources.len(), 2);
        assert_eq!(snapshot.root_module, "rbac@1.0.0");
        // Leaves resolve before the product; rg is declared first.
        assert_eq!(snapshot.resources[0].id.name, "rg-app");
        assert_eq!(snapshot.resources[1].id.name, "reader");
        assert_eq!(
            snapshot.resources[0].properties["environment"],
            serde_json::Value::String(String::from("nonprod"))
        );
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let source = rbac_fixture();
        let resolver = Resolver::new(&source);

        let first = resolver.resolve(&rbac_request()).await.expect("resolve");
        let second = resolver.resolve(&rbac_request()).await.expect("resolve");

        assert_eq!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn test_missing_parameter_names_module_and_parameter() {
        let source = rbac_fixture();
        let resolver = Resolver::new(&source);

        let mut request = rbac_request();
        request.parameters.clear();

        let err = resolver.resolve(&request).await.expect_err("must fail");
        match err {
            DriftstackError::Graph(GraphError::MissingParameter { module, parameter }) => {
                assert_eq!(module, "rbac");
                assert_eq!(parameter, "environment");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unresolved_reference() {
        let mut source = rbac_fixture();
        source.modules.retain(|m| m.name != "role-assignment");
        let resolver = Resolver::new(&source);

        let err = resolver
            .resolve(&rbac_request())
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            DriftstackError::Graph(GraphError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_cycle_detection() {
        // Two composed services depending on each other.
        let a = ModuleDefinition {
            name: String::from("a"),
            kind: ModuleKind::Service,
            version: Version::new(1, 0, 0),
            parameters: vec![],
            dependencies: vec![DependencyRef {
                name: String::from("b"),
                range: VersionReq::STAR,
                parameters: BTreeMap::new(),
            }],
            resources: vec![],
        };
        let b = ModuleDefinition {
            name: String::from("b"),
            kind: ModuleKind::Service,
            version: Version::new(1, 0, 0),
            parameters: vec![],
            dependencies: vec![DependencyRef {
                name: String::from("a"),
                range: VersionReq::STAR,
                parameters: BTreeMap::new(),
            }],
            resources: vec![],
        };
        let source = FixtureSource {
            modules: vec![a, b],
        };
        let resolver = Resolver::new(&source);

        let request = ResolveRequest {
            root: ModuleRef::any("a"),
            parameters: BTreeMap::new(),
            environment: String::from("dev"),
            scope: String::from("sub/dev"),
        };

        let err = resolver.resolve(&request).await.expect_err("must fail");
        match err {
            DriftstackError::Graph(GraphError::CyclicDependency { cycle }) => {
                assert!(cycle.contains("a -> b -> a"), "cycle was: {cycle}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let mut source = rbac_fixture();
        // The service pins rg@1.0.0; add a second service edge demanding ^2.
        let service2 = ModuleDefinition {
            name: String::from("iam-extra"),
            kind: ModuleKind::Service,
            version: Version::new(1, 0, 0),
            parameters: vec![param("environment", true)],
            dependencies: vec![DependencyRef {
                name: String::from("rg"),
                range: VersionReq::parse("^2.0").expect("range"),
                parameters: [(String::from("environment"), from("environment"))]
                    .into_iter()
                    .collect(),
            }],
            resources: vec![],
        };
        let rg2 = resource_module("rg", "rg-app", "resource-group");
        let rg2 = ModuleDefinition {
            version: Version::new(2, 0, 0),
            ..rg2
        };
        source.modules.push(service2);
        source.modules.push(rg2);

        if let Some(product) = source.modules.iter_mut().find(|m| m.name == "rbac") {
            product.dependencies.push(dep(
                "iam-extra",
                &[("environment", from("environment"))],
            ));
        }

        let resolver = Resolver::new(&source);
        let err = resolver
            .resolve(&rbac_request())
            .await
            .expect_err("must fail");
        match err {
            DriftstackError::Graph(GraphError::VersionConflict { module, .. }) => {
                assert_eq!(module, "rg");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_hierarchy_violation() {
        // A resource module depending on a service module is rejected.
        let service = ModuleDefinition {
            name: String::from("svc"),
            kind: ModuleKind::Service,
            version: Version::new(1, 0, 0),
            parameters: vec![],
            dependencies: vec![],
            resources: vec![],
        };
        let resource = ModuleDefinition {
            name: String::from("res"),
            kind: ModuleKind::Resource,
            version: Version::new(1, 0, 0),
            parameters: vec![],
            dependencies: vec![DependencyRef {
                name: String::from("svc"),
                range: VersionReq::STAR,
                parameters: BTreeMap::new(),
            }],
            resources: vec![],
        };
        let source = FixtureSource {
            modules: vec![service, resource],
        };
        let resolver = Resolver::new(&source);

        let request = ResolveRequest {
            root: ModuleRef::any("res"),
            parameters: BTreeMap::new(),
            environment: String::from("dev"),
            scope: String::from("sub/dev"),
        };

        let err = resolver.resolve(&request).await.expect_err("must fail");
        assert!(matches!(
            err,
            DriftstackError::Graph(GraphError::InvalidHierarchy { .. })
        ));
    }
}
