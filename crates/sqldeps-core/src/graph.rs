//! Dependency edges and the target-indexed dependency map
//!
//! Every edge points from a source entity (table, CTE, placeholder or
//! procedure node) to the entity it feeds. The map is keyed by target.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use crate::config::FilterConfig;

/// Entity name: table, CTE, `"name (alias)"`, placeholder or `$procedure$`
pub type EntityName = String;

/// Placeholder prefixes for entities that have no name in the SQL text
pub const PLACEHOLDER_KINDS: [&str; 3] = ["result", "input", "unknown"];

/// Check whether an entity name is a generated `result N`/`input N`/`unknown N` placeholder
pub fn is_placeholder(name: &str) -> bool {
    let Some((kind, number)) = name.split_once(' ') else {
        return false;
    };

    PLACEHOLDER_KINDS.contains(&kind)
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

/// Entity name without a trailing `" (alias)"`
pub fn unaliased(name: &str) -> &str {
    match name.strip_suffix(')').and_then(|rest| rest.rsplit_once(" (")) {
        Some((base, alias)) if !base.is_empty() && !alias.is_empty() => base,
        _ => name,
    }
}

/// SQL construct that created a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Merge,
    Select,
    Join,
    /// Table read by a subquery nested inside an expression
    Reference,
    Create,
    Alter,
    /// Procedure writes a buffer table
    BufferWrite,
    /// Procedure reads a buffer table
    BufferRead,
}

impl OperationKind {
    /// All operation kinds, in declaration order
    pub const ALL: [OperationKind; 11] = [
        Self::Insert,
        Self::Update,
        Self::Delete,
        Self::Merge,
        Self::Select,
        Self::Join,
        Self::Reference,
        Self::Create,
        Self::Alter,
        Self::BufferWrite,
        Self::BufferRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Merge => "Merge",
            Self::Select => "Select",
            Self::Join => "Join",
            Self::Reference => "Reference",
            Self::Create => "Create",
            Self::Alter => "Alter",
            Self::BufferWrite => "BufferWrite",
            Self::BufferRead => "BufferRead",
        }
    }

    /// Operations that name the write target of a whole statement
    pub fn is_statement_op(&self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Delete | Self::Merge | Self::Select
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    /// Case-insensitive; accepts `buffer_write`, `bufferwrite` and `BufferWrite`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect();

        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("unknown operation '{}'", s.trim()))
    }
}

/// A single dependency: `source` feeds `target` through `operation`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: EntityName,
    pub target: EntityName,
    pub operation: OperationKind,

    /// Both ends lie on one CTE recursion cycle
    #[serde(default)]
    pub is_recursive: bool,

    /// UPDATE that reads the table it writes
    #[serde(default)]
    pub is_internal_update: bool,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            operation,
            is_recursive: false,
            is_internal_update: false,
        }
    }

    pub fn recursive(mut self) -> Self {
        self.is_recursive = true;
        self
    }

    pub fn internal_update(mut self) -> Self {
        self.is_internal_update = true;
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    /// Self-loops survive only when flagged
    pub fn is_admissible(&self) -> bool {
        !self.is_self_loop() || self.is_recursive || self.is_internal_update
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_internal_update { "internal" } else { "normal" };
        write!(
            f,
            "Edge({} -> {}, {}, {}{})",
            self.source,
            self.target,
            self.operation,
            status,
            if self.is_recursive { " (recursive)" } else { "" }
        )
    }
}

/// Edge predicate built from `[filter]` config or CLI flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeFilter {
    /// Empty means every operation is kept
    pub operations: BTreeSet<OperationKind>,
    pub hide_placeholders: bool,
}

impl EdgeFilter {
    pub fn allows(&self, edge: &Edge) -> bool {
        if !self.operations.is_empty() && !self.operations.contains(&edge.operation) {
            return false;
        }

        !(self.hide_placeholders && (is_placeholder(&edge.source) || is_placeholder(&edge.target)))
    }

    pub fn is_noop(&self) -> bool {
        self.operations.is_empty() && !self.hide_placeholders
    }
}

impl From<&FilterConfig> for EdgeFilter {
    fn from(config: &FilterConfig) -> Self {
        Self {
            operations: config.operations.iter().copied().collect(),
            hide_placeholders: config.hide_placeholders,
        }
    }
}

/// Target-indexed dependency map
///
/// Keys are targets, values the de-duplicated set of incoming edges.
/// A key may map to an empty set (entity registered with no sources).
/// Iteration order is deterministic but carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap {
    entries: BTreeMap<EntityName, BTreeSet<Edge>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge under its target
    ///
    /// Returns `false` when the edge was already present or is an
    /// unflagged self-loop.
    pub fn add(&mut self, edge: Edge) -> bool {
        if !edge.is_admissible() {
            return false;
        }

        self.entries
            .entry(edge.target.clone())
            .or_default()
            .insert(edge)
    }

    /// Register an entity as a target even when it has no sources
    pub fn ensure_node(&mut self, name: impl Into<String>) {
        self.entries.entry(name.into()).or_default();
    }

    /// Incoming edges of a target
    pub fn get(&self, target: &str) -> Option<&BTreeSet<Edge>> {
        self.entries.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &EntityName> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityName, &BTreeSet<Edge>)> {
        self.entries.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.entries.values().flatten()
    }

    pub fn contains(&self, source: &str, target: &str, operation: OperationKind) -> bool {
        self.get(target)
            .map(|edges| {
                edges
                    .iter()
                    .any(|e| e.source == source && e.operation == operation)
            })
            .unwrap_or(false)
    }

    /// Targets plus every edge endpoint
    pub fn nodes(&self) -> BTreeSet<EntityName> {
        let mut nodes: BTreeSet<EntityName> = self.entries.keys().cloned().collect();
        for edge in self.edges() {
            nodes.insert(edge.source.clone());
            nodes.insert(edge.target.clone());
        }
        nodes
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union with another map
    pub fn merge(&mut self, other: DependencyMap) {
        for (target, edges) in other.entries {
            let slot = self.entries.entry(target).or_default();
            slot.extend(edges);
        }
    }

    /// Union that skips an edge when its target already has an edge with
    /// the same `(source, operation)`
    pub fn merge_distinct<I>(&mut self, edges: I)
    where
        I: IntoIterator<Item = Edge>,
    {
        for edge in edges {
            let duplicate = self.contains(&edge.source, &edge.target, edge.operation);
            if !duplicate {
                self.add(edge);
            }
        }
    }

    /// Copy of the map keeping only edges the filter allows
    ///
    /// Targets with no surviving edges are dropped unless they were
    /// already source-less and not hidden.
    pub fn filtered(&self, filter: &EdgeFilter) -> DependencyMap {
        if filter.is_noop() {
            return self.clone();
        }

        let mut result = DependencyMap::new();
        for (target, edges) in &self.entries {
            let kept: BTreeSet<Edge> = edges
                .iter()
                .filter(|edge| filter.allows(edge))
                .cloned()
                .collect();

            let hidden = filter.hide_placeholders && is_placeholder(target);
            if !kept.is_empty() {
                result.entries.insert(target.clone(), kept);
            } else if edges.is_empty() && !hidden && filter.operations.is_empty() {
                result.entries.insert(target.clone(), BTreeSet::new());
            }
        }
        result
    }
}

impl FromIterator<Edge> for DependencyMap {
    fn from_iter<T: IntoIterator<Item = Edge>>(iter: T) -> Self {
        let mut map = DependencyMap::new();
        for edge in iter {
            map.add(edge);
        }
        map
    }
}
