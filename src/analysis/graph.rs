//! The dependency graph of a project.
//!
//! Nodes live in the columnar `Registry` (one model node per scope, one node
//! per calculation and verification). Each consumer keeps one `Binding` per
//! declared parameter, and there is one registry edge per binding.

use super::error::GraphError;
use super::resolve::{resolve_reference, resolve_verification, ResolveError};
use super::topology;
use crate::path::{check_name, ProjectPath};
use crate::store::{NodeId, NodeKey, NodeKind, NodeMetadata, Param, Project, Registry, Scope};
use crate::value::ValueKind;
use log::debug;
use petgraph::dot::Dot;
use petgraph::graph::DiGraph;
use std::collections::BTreeSet;

/// A resolved parameter: where its argument comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub param: String,
    /// Full path read, including any attribute or index segments.
    pub source: ProjectPath,
    pub producer: NodeId,
    pub kind: ValueKind,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    registry: Registry,
    bindings: Vec<Vec<Binding>>,
    /// Verifications each node takes for granted. Not edges.
    assumptions: Vec<Vec<NodeId>>,
    order: Vec<NodeId>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize { self.registry.count() }
    pub fn is_empty(&self) -> bool { self.registry.count() == 0 }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.registry.count()).map(NodeId::new)
    }

    pub fn node_id(&self, key: &NodeKey) -> Option<NodeId> {
        self.registry.lookup(key)
    }

    pub fn meta(&self, id: NodeId) -> &NodeMetadata { &self.registry.meta[id.index()] }
    pub fn key(&self, id: NodeId) -> &NodeKey { &self.registry.meta[id.index()].key }
    pub fn kind(&self, id: NodeId) -> NodeKind { self.registry.kinds[id.index()] }
    pub fn parents(&self, id: NodeId) -> &[NodeId] { self.registry.get_parents(id) }
    pub fn bindings(&self, id: NodeId) -> &[Binding] { &self.bindings[id.index()] }
    pub fn assumptions(&self, id: NodeId) -> &[NodeId] { &self.assumptions[id.index()] }
    pub fn registry(&self) -> &Registry { &self.registry }

    /// Direct consumers of `id`, ascending and without repeats.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.registry.children(id).collect();
        set.into_iter().collect()
    }

    /// Deterministic evaluation order: every producer precedes its consumers,
    /// ties broken by (scope name, node kind, declaration order).
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// The topological order split into waves of mutually independent nodes.
    pub fn waves(&self) -> Vec<Vec<NodeId>> {
        topology::waves(&self.registry, &self.order)
    }

    /// Every node `id` depends on, directly or transitively.
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut set = topology::upstream_from(&self.registry, &[id]);
        set.remove(&id);
        set
    }

    /// Every node depending on `id`, directly or transitively.
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut set = topology::downstream_from(&self.registry, &[id]);
        set.remove(&id);
        set
    }

    /// Graphviz rendering. Edges run producer -> consumer and carry the
    /// parameter name.
    pub fn to_dot(&self) -> String {
        let mut g = DiGraph::<String, String>::with_capacity(self.len(), self.registry.parents_flat.len());
        let idx: Vec<_> = self.node_ids().map(|id| g.add_node(self.key(id).to_string())).collect();
        for consumer in self.node_ids() {
            for b in self.bindings(consumer) {
                g.add_edge(idx[b.producer.index()], idx[consumer.index()], b.param.clone());
            }
        }
        format!("{}", Dot::new(&g))
    }
}

enum Decl<'a> {
    Model,
    Calc { params: &'a [Param], imports: &'a [String], assumes: &'a [String] },
}

/// Builds the dependency graph of `project`.
///
/// Fails on the first structural problem: a bad name or reference, an
/// unknown or unimported scope, a dangling reference, a duplicate
/// declaration or a cycle.
pub fn build_graph(project: &Project) -> Result<DependencyGraph, GraphError> {
    check_scopes(project)?;

    // 1. Allocate nodes, scope by scope.
    let mut registry = Registry::new();
    let mut decls: Vec<(NodeId, &Scope, Decl)> = Vec::new();
    for (si, scope) in project.scopes().iter().enumerate() {
        let mut alloc = |key: NodeKey, order: usize| {
            let path = key.to_string();
            if key.kind != NodeKind::Model {
                check_name(&key.name, "declaration name")
                    .map_err(|source| GraphError::InvalidName { path: path.clone(), source })?;
            }
            registry
                .add_node(NodeMetadata { key, scope_index: si as u32, order: order as u32 })
                .ok_or(GraphError::DuplicateDeclaration { path })
        };
        decls.push((alloc(NodeKey::model(scope.name()), 0)?, scope, Decl::Model));
        for (i, c) in scope.calculations().iter().enumerate() {
            let id = alloc(NodeKey::calculation(scope.name(), c.name.clone()), i)?;
            decls.push((id, scope, Decl::Calc { params: &c.params, imports: &c.imports, assumes: &c.assumes }));
        }
        for (i, v) in scope.verifications().iter().enumerate() {
            let id = alloc(NodeKey::verification(scope.name(), v.name.clone()), i)?;
            decls.push((id, scope, Decl::Calc { params: &v.params, imports: &v.imports, assumes: &v.assumes }));
        }
    }

    // 2-4. Resolve every parameter and wire the edges.
    let mut bindings = Vec::with_capacity(decls.len());
    let mut assumptions = Vec::with_capacity(decls.len());
    for (id, scope, decl) in decls {
        let (node_bindings, node_assumptions) = match decl {
            Decl::Model => (Vec::new(), Vec::new()),
            Decl::Calc { params, imports, assumes } => {
                let node = registry.meta[id.index()].key.to_string();
                (
                    bind_params(project, &registry, scope, &node, params, imports)?,
                    link_assumptions(&registry, scope, &node, assumes)?,
                )
            }
        };
        let parents: Vec<NodeId> = node_bindings.iter().map(|b| b.producer).collect();
        registry.set_parents(id, &parents);
        bindings.push(node_bindings);
        assumptions.push(node_assumptions);
    }

    // 5. Cycles
    if let Some(cycle) = topology::find_cycle(&registry) {
        let cycle = cycle.iter().map(|id| registry.meta[id.index()].key.to_string()).collect();
        return Err(GraphError::CyclicDependency { cycle });
    }

    // 6. Deterministic order
    let order = topology::sort_by_rank(&registry, |id| {
        let m = &registry.meta[id.index()];
        (m.key.scope.clone(), m.key.kind, m.order)
    })
    .ok_or_else(|| GraphError::CyclicDependency { cycle: Vec::new() })?;

    debug!(
        "built dependency graph: {} nodes, {} edges",
        registry.count(),
        registry.parents_flat.len()
    );
    Ok(DependencyGraph { registry, bindings, assumptions, order })
}

fn check_scopes(project: &Project) -> Result<(), GraphError> {
    let mut seen = BTreeSet::new();
    for scope in project.scopes() {
        if !seen.insert(scope.name()) {
            return Err(GraphError::DuplicateDeclaration { path: NodeKey::model(scope.name()).to_string() });
        }
    }

    let declared_imports = project.scopes().iter().flat_map(|s| {
        let decl_imports = s
            .calculations()
            .iter()
            .flat_map(|c| &c.imports)
            .chain(s.verifications().iter().flat_map(|v| &v.imports));
        s.imports().iter().chain(decl_imports).map(move |i| (s.name(), i))
    });
    for (scope, import) in declared_imports {
        if project.scope(import).is_none() {
            return Err(GraphError::UnknownImport { scope: scope.to_string(), import: import.clone() });
        }
    }
    Ok(())
}

fn bind_params(
    project: &Project,
    registry: &Registry,
    scope: &Scope,
    node: &str,
    params: &[Param],
    extra_imports: &[String],
) -> Result<Vec<Binding>, GraphError> {
    let imports: BTreeSet<String> = scope.imports().iter().chain(extra_imports).cloned().collect();

    params
        .iter()
        .map(|param| {
            let source = resolve_reference(&param.reference, param.scope.as_deref(), scope.name(), &imports)
                .map_err(|e| lift_resolve_error(project, scope, node, &param.name, e))?;

            let producer = registry
                .lookup(&NodeKey::producing(&source))
                .ok_or_else(|| GraphError::DanglingReference { node: node.to_string(), path: source.to_string() })?;

            if source.scope() != scope.name() && !imports.contains(source.scope()) {
                return Err(GraphError::UnimportedScope {
                    scope: scope.name().to_string(),
                    foreign_scope: source.scope().to_string(),
                });
            }

            Ok(Binding { param: param.name.clone(), source, producer, kind: param.kind })
        })
        .collect()
}

fn link_assumptions(registry: &Registry, scope: &Scope, node: &str, assumes: &[String]) -> Result<Vec<NodeId>, GraphError> {
    assumes
        .iter()
        .map(|reference| {
            let invalid = |reason: String| GraphError::InvalidAssumption {
                node: node.to_string(),
                reference: reference.clone(),
                reason,
            };
            let path = resolve_verification(reference, scope.name()).map_err(|e| invalid(e.to_string()))?;
            registry
                .lookup(&NodeKey::producing(&path))
                .ok_or_else(|| invalid(format!("'{}' is not declared", path)))
        })
        .collect()
}

fn lift_resolve_error(project: &Project, scope: &Scope, node: &str, param: &str, e: ResolveError) -> GraphError {
    let node = node.to_string();
    let param = param.to_string();
    match e {
        ResolveError::Syntax(source) => GraphError::PathSyntax { node, param, source },
        ResolveError::UnknownScope { scope: foreign, .. } if project.scope(&foreign).is_some() => {
            GraphError::UnimportedScope { scope: scope.name().to_string(), foreign_scope: foreign }
        }
        ResolveError::UnknownScope { scope: foreign, .. } => GraphError::UnknownScope { node, param, scope: foreign },
        e @ ResolveError::AmbiguousReference { .. } => GraphError::AmbiguousReference { node, param, reason: e.to_string() },
        ResolveError::MalformedReference { reason, .. } => GraphError::MalformedReference { node, param, reason },
    }
}
