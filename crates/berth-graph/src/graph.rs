//! Dependency graph management using `petgraph`.
//!
//! Builds a directed acyclic graph from the registry. Every edge points from
//! a dependency to its dependent so topological order is apply order. A
//! single synthetic root node sits downstream of every resource that nothing
//! depends on, which keeps the graph connected.

use std::collections::HashMap;
use std::sync::Arc;

use berth_common::error::{BerthError, Result};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef, Reversed};
use tracing::debug;

use crate::registry::Registry;
use crate::resource::Resource;

/// Prefix of a dependency naming every resource of a module.
const MODULE_PREFIX: &str = "module.";

/// A node of the resource graph.
#[derive(Debug, Clone)]
pub enum Node {
    /// The synthetic sink every leaf resource points at.
    Root,
    /// A declared resource.
    Resource(Arc<Resource>),
}

impl Node {
    fn resource(&self) -> Option<&Arc<Resource>> {
        match self {
            Self::Root => None,
            Self::Resource(r) => Some(r),
        }
    }
}

/// A validated, acyclic dependency graph of resources.
#[derive(Debug)]
pub struct ResourceGraph {
    graph: DiGraph<Node, ()>,
    root: NodeIndex,
    index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl ResourceGraph {
    /// Builds the graph of every resource in `registry`.
    ///
    /// Explicit `depends_on` entries and the references named by each
    /// resource's configuration become edges. `module.<name>` expands to every
    /// resource declared in that module. A bare reference from inside a
    /// module falls back to the same module when no top-level match exists.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::UnresolvedDependency`] naming the missing string
    /// and the declaring resource, or [`BerthError::Cycle`] naming one edge of
    /// a cycle. No graph is returned in either case.
    pub fn build(registry: &Registry) -> Result<Self> {
        let mut graph = DiGraph::new();
        let root = graph.add_node(Node::Root);
        let mut index = HashMap::with_capacity(registry.len());

        for resource in registry.resources() {
            let node = graph.add_node(Node::Resource(Arc::clone(resource)));
            let _ = index.insert(resource.reference().to_string(), node);
        }

        for resource in registry.resources() {
            let dependent = index[&resource.reference().to_string()];
            for dependency in resource.dependency_references() {
                for target in resolve(&dependency, resource, registry, &index)? {
                    if !graph.contains_edge(target, dependent) {
                        let _ = graph.add_edge(target, dependent, ());
                    }
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(cycle_error(&graph, cycle.node_id()));
        }

        let leaves: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&n| n != root)
            .filter(|&n| graph.neighbors_directed(n, Direction::Outgoing).next().is_none())
            .collect();
        for leaf in leaves {
            let _ = graph.add_edge(leaf, root, ());
        }

        let order = toposort(&graph, None).map_err(|cycle| cycle_error(&graph, cycle.node_id()))?;
        debug!(
            resources = registry.len(),
            edges = graph.edge_count(),
            "built resource graph"
        );

        Ok(Self {
            graph,
            root,
            index,
            order,
        })
    }

    /// Returns every resource in apply order.
    #[must_use]
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        self.order
            .iter()
            .filter_map(|&n| self.graph[n].resource().cloned())
            .collect()
    }

    /// Returns the resource with the given reference.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if the reference is not in the graph.
    pub fn get(&self, reference: &str) -> Result<Arc<Resource>> {
        self.node(reference)
            .and_then(|n| self.graph[n].resource().cloned())
            .ok_or_else(|| not_found(reference))
    }

    /// Returns the direct dependencies of a resource.
    #[must_use]
    pub fn dependencies(&self, resource: &Resource) -> Vec<Arc<Resource>> {
        self.neighbors(resource, Direction::Incoming)
    }

    /// Returns the direct dependents of a resource.
    #[must_use]
    pub fn dependents(&self, resource: &Resource) -> Vec<Arc<Resource>> {
        self.neighbors(resource, Direction::Outgoing)
    }

    /// Returns every resource that transitively depends on `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if the reference is not in the graph.
    pub fn descendants(&self, reference: &str) -> Result<Vec<Arc<Resource>>> {
        let start = self.node(reference).ok_or_else(|| not_found(reference))?;
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(n) = bfs.next(&self.graph) {
            if n != start {
                found.extend(self.graph[n].resource().cloned());
            }
        }
        Ok(found)
    }

    /// Returns every resource `reference` transitively depends on.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if the reference is not in the graph.
    pub fn ancestors(&self, reference: &str) -> Result<Vec<Arc<Resource>>> {
        let start = self.node(reference).ok_or_else(|| not_found(reference))?;
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut found = Vec::new();
        while let Some(n) = bfs.next(reversed) {
            if n != start {
                found.extend(self.graph[n].resource().cloned());
            }
        }
        Ok(found)
    }

    /// Returns the number of dependency edges, root edges excluded.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.graph
            .edge_references()
            .filter(|e| e.target() != self.root)
            .count()
    }

    /// Returns the number of resources in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count() - 1
    }

    /// Returns `true` if the graph holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the resources connected directly to the root node.
    #[must_use]
    pub fn leaves(&self) -> Vec<Arc<Resource>> {
        self.graph
            .neighbors_directed(self.root, Direction::Incoming)
            .filter_map(|n| self.graph[n].resource().cloned())
            .collect()
    }

    fn node(&self, reference: &str) -> Option<NodeIndex> {
        self.index.get(reference).copied()
    }

    fn neighbors(&self, resource: &Resource, direction: Direction) -> Vec<Arc<Resource>> {
        self.node(&resource.reference().to_string())
            .map(|n| {
                self.graph
                    .neighbors_directed(n, direction)
                    .filter_map(|m| self.graph[m].resource().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn resolve(
    dependency: &str,
    declared_by: &Resource,
    registry: &Registry,
    index: &HashMap<String, NodeIndex>,
) -> Result<Vec<NodeIndex>> {
    let unresolved = || BerthError::UnresolvedDependency {
        reference: declared_by.reference().to_string(),
        dependency: dependency.to_string(),
    };

    if let Some(module) = dependency.strip_prefix(MODULE_PREFIX) {
        let members: Vec<NodeIndex> = registry
            .in_module(module)
            .iter()
            .filter_map(|r| index.get(&r.reference().to_string()).copied())
            .collect();
        return if members.is_empty() {
            Err(unresolved())
        } else {
            Ok(members)
        };
    }

    if let Some(&node) = index.get(dependency) {
        return Ok(vec![node]);
    }
    declared_by
        .reference()
        .module()
        .and_then(|module| index.get(&format!("{dependency}.{module}")).copied())
        .map(|node| vec![node])
        .ok_or_else(unresolved)
}

fn cycle_error(graph: &DiGraph<Node, ()>, at: NodeIndex) -> BerthError {
    let label = |n: NodeIndex| {
        graph[n]
            .resource()
            .map_or_else(|| "root".to_string(), |r| r.reference().to_string())
    };
    let component = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&at))
        .unwrap_or_default();
    let to = graph
        .neighbors_directed(at, Direction::Outgoing)
        .find(|n| component.contains(n))
        .unwrap_or(at);
    BerthError::Cycle {
        from: label(at),
        to: label(to),
    }
}

fn not_found(reference: &str) -> BerthError {
    BerthError::NotFound {
        kind: "resource",
        id: reference.to_string(),
    }
}
