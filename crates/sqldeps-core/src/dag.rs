//! Entity graph construction and traversal
//!
//! Builds forward and reverse adjacency from a dependency map for impact analysis.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use crate::graph::{DependencyMap, EntityName};

/// Dependency graph with forward and reverse edges
///
/// Operation kinds and flags are collapsed; only "source feeds target" remains.
/// Self-loops (recursive CTEs, internal updates) are not represented.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Target -> entities it reads from (parents)
    parents: HashMap<EntityName, BTreeSet<EntityName>>,

    /// Source -> entities it feeds (children)
    children: HashMap<EntityName, BTreeSet<EntityName>>,

    /// All nodes in the graph
    nodes: BTreeSet<EntityName>,
}

impl DependencyGraph {
    /// Build a graph from a dependency map
    pub fn from_dependencies(dependencies: &DependencyMap) -> Self {
        let mut graph = Self {
            nodes: dependencies.nodes(),
            ..Self::default()
        };

        for edge in dependencies.edges() {
            if edge.is_self_loop() {
                continue;
            }

            graph
                .parents
                .entry(edge.target.clone())
                .or_default()
                .insert(edge.source.clone());
            graph
                .children
                .entry(edge.source.clone())
                .or_default()
                .insert(edge.target.clone());
        }

        graph
    }

    /// Get all nodes in the graph
    pub fn all_nodes(&self) -> Vec<&EntityName> {
        self.nodes.iter().collect()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    /// Get immediate parents (sources) of a node
    pub fn parents(&self, node: &str) -> Vec<&EntityName> {
        self.parents
            .get(node)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get immediate children (dependents) of a node
    pub fn children(&self, node: &str) -> Vec<&EntityName> {
        self.children
            .get(node)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get all downstream nodes (transitive closure of children)
    ///
    /// This is the blast radius: every entity fed, directly or not, by `node`.
    pub fn downstream(&self, node: &str) -> Vec<EntityName> {
        Self::reach(node, &self.children)
    }

    /// Get all upstream nodes (transitive closure of parents)
    pub fn upstream(&self, node: &str) -> Vec<EntityName> {
        Self::reach(node, &self.parents)
    }

    /// Breadth-first closure over one adjacency direction, in discovery order
    fn reach(start: &str, adjacency: &HashMap<EntityName, BTreeSet<EntityName>>) -> Vec<EntityName> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&EntityName> = VecDeque::new();
        let mut result = Vec::new();

        if let Some(next) = adjacency.get(start) {
            queue.extend(next.iter());
        }

        while let Some(current) = queue.pop_front() {
            if current == start || !visited.insert(current.as_str()) {
                continue;
            }

            result.push(current.clone());

            if let Some(next) = adjacency.get(current) {
                queue.extend(next.iter().filter(|n| !visited.contains(n.as_str())));
            }
        }

        result
    }

    /// Check if there's a path from source to target
    pub fn has_path(&self, source: &str, target: &str) -> bool {
        self.downstream(source).iter().any(|n| n == target)
    }

    /// Get topological sort of all nodes (sources before the entities they feed)
    ///
    /// Returns `None` when the graph has a cycle.
    pub fn topological_sort(&self) -> Option<Vec<EntityName>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|node| {
                let degree = self.parents.get(node).map(BTreeSet::len).unwrap_or(0);
                (node.as_str(), degree)
            })
            .collect();

        // Seed in node order for a deterministic result
        let mut queue: VecDeque<&EntityName> = self
            .nodes
            .iter()
            .filter(|node| in_degree.get(node.as_str()) == Some(&0))
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        // Kahn's algorithm
        while let Some(node) = queue.pop_front() {
            result.push(node.clone());

            if let Some(children) = self.children.get(node) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Some(result)
        } else {
            None // Graph has cycles
        }
    }
}
