//! Reference resolution for table factors and nested queries
//!
//! Walks a chain of wrapper nodes (derived table, query, set expression,
//! select, first FROM relation) until it reaches a named table.

use sqlparser::ast::{visit_relations, ObjectName, Query, Select, SetExpr, TableFactor, Visit};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// Upper bound on wrapper nodes followed before giving up
pub const MAX_REFERENCE_HOPS: usize = 100;

/// Render an object name as its unquoted dotted form (`schema.table`)
pub fn entity_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// A resolved table reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedName {
    /// Reference to a CTE defined somewhere in the batch
    Cte { name: String },

    /// A table reference
    Table {
        name: String,
        /// Alias if present
        alias: Option<String>,
    },
}

impl ResolvedName {
    /// Entity name used in the dependency map
    ///
    /// CTEs render bare even when aliased; tables render `"name (alias)"`.
    pub fn render(&self) -> String {
        match self {
            Self::Cte { name } => name.clone(),
            Self::Table { name, alias: Some(alias) } => format!("{} ({})", name, alias),
            Self::Table { name, alias: None } => name.clone(),
        }
    }
}

impl std::fmt::Display for ResolvedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Name resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Unresolved table reference: {0}")]
    Unresolved(String),

    #[error("Reference chain exceeded {0} hops")]
    HopLimitExceeded(usize),
}

/// One link of the reference chain
#[derive(Clone, Copy)]
enum RefNode<'a> {
    Factor(&'a TableFactor),
    Query(&'a Query),
    SetExpr(&'a SetExpr),
    Select(&'a Select),
}

impl RefNode<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Factor(_) => "table factor",
            Self::Query(_) => "query",
            Self::SetExpr(_) => "set expression",
            Self::Select(_) => "select",
        }
    }

    /// First relation anywhere beneath this node
    fn first_relation(&self) -> Option<ObjectName> {
        fn first<V: Visit>(node: &V) -> Option<ObjectName> {
            let flow = visit_relations(node, |relation| ControlFlow::Break(relation.clone()));
            match flow {
                ControlFlow::Break(name) => Some(name),
                ControlFlow::Continue(()) => None,
            }
        }

        match self {
            Self::Factor(factor) => first(*factor),
            Self::Query(query) => first(*query),
            Self::SetExpr(set_expr) => first(*set_expr),
            Self::Select(select) => first(*select),
        }
    }
}

/// Reference resolver bound to the CTE names known for a batch
pub struct ReferenceResolver<'a> {
    ctes: &'a BTreeSet<String>,
    max_hops: usize,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(ctes: &'a BTreeSet<String>) -> Self {
        Self {
            ctes,
            max_hops: MAX_REFERENCE_HOPS,
        }
    }

    /// Override the hop bound
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn resolve_factor(&self, factor: &TableFactor) -> Result<ResolvedName, ResolveError> {
        self.resolve(RefNode::Factor(factor))
    }

    pub fn resolve_query(&self, query: &Query) -> Result<ResolvedName, ResolveError> {
        self.resolve(RefNode::Query(query))
    }

    pub fn resolve_set_expr(&self, set_expr: &SetExpr) -> Result<ResolvedName, ResolveError> {
        self.resolve(RefNode::SetExpr(set_expr))
    }

    /// Name an object directly, without following any chain
    pub fn name_of(&self, name: &ObjectName, alias: Option<String>) -> ResolvedName {
        let rendered = entity_name(name);
        if self.ctes.contains(&rendered) {
            ResolvedName::Cte { name: rendered }
        } else {
            ResolvedName::Table {
                name: rendered,
                alias,
            }
        }
    }

    fn resolve(&self, start: RefNode<'_>) -> Result<ResolvedName, ResolveError> {
        let mut current = start;

        for _ in 0..self.max_hops {
            let next = match current {
                RefNode::Factor(TableFactor::Table { name, alias, .. }) => {
                    let alias = alias.as_ref().map(|a| a.name.value.clone());
                    return Ok(self.name_of(name, alias));
                }
                RefNode::Factor(TableFactor::Derived { subquery, .. }) => RefNode::Query(subquery),
                RefNode::Factor(TableFactor::NestedJoin { table_with_joins, .. }) => {
                    RefNode::Factor(&table_with_joins.relation)
                }
                RefNode::Query(query) => RefNode::SetExpr(&query.body),
                RefNode::SetExpr(SetExpr::Select(select)) => RefNode::Select(select),
                RefNode::SetExpr(SetExpr::Query(query)) => RefNode::Query(query),
                RefNode::SetExpr(SetExpr::SetOperation { left, .. }) => RefNode::SetExpr(left),
                RefNode::Select(select) => match select.from.first() {
                    Some(from) => RefNode::Factor(&from.relation),
                    None => return self.fallback(start, current),
                },
                _ => return self.fallback(start, current),
            };
            current = next;
        }

        tracing::warn!(hops = self.max_hops, "reference chain too long");
        Err(ResolveError::HopLimitExceeded(self.max_hops))
    }

    /// Scan the reachable sub-tree for any table reference
    fn fallback(&self, start: RefNode<'_>, stopped_at: RefNode<'_>) -> Result<ResolvedName, ResolveError> {
        match start.first_relation() {
            Some(name) => {
                tracing::debug!(stopped_at = stopped_at.kind(), "resolved reference by relation scan");
                Ok(self.name_of(&name, None))
            }
            None => Err(ResolveError::Unresolved(format!(
                "no table reference beneath {}",
                stopped_at.kind()
            ))),
        }
    }
}
