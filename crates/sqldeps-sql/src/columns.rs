//! Column-level lineage
//!
//! Best-effort extraction of which columns a statement writes and which
//! columns its WHERE clause filters on. Column pairs are `"dst:src"`.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{AssignmentTarget, Expr, Query, Select, SelectItem, SetExpr, Statement};
use sqldeps_core::{Diagnostic, DiagnosticCode};
use std::collections::VecDeque;

use crate::builder::dml_body;

/// Column detail attached to a statement edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLineage {
    /// `"dst:src"` pairs, or plain projection names for SELECT
    pub target_columns: Option<Vec<String>>,

    /// Columns the WHERE clause filters on; `None` without a WHERE clause
    pub filter_columns: Option<Vec<String>>,
}

impl ColumnLineage {
    pub fn is_empty(&self) -> bool {
        self.target_columns.is_none() && self.filter_columns.is_none()
    }
}

/// Column extraction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnError {
    #[error("UPDATE has no SET items")]
    NoAssignments,

    #[error("MERGE condition is not a binary comparison: {0}")]
    MergeCondition(String),

    #[error("query has no SELECT projection")]
    NoProjection,

    #[error("column lineage is not derived for {0}")]
    Unsupported(String),
}

/// Derive column lineage for a statement
pub fn extract_columns(statement: &Statement) -> Result<ColumnLineage, ColumnError> {
    match statement {
        Statement::Insert(insert) => {
            let targets: Vec<String> = if insert.columns.is_empty() {
                vec!["*".to_string()]
            } else {
                insert.columns.iter().map(|c| c.value.clone()).collect()
            };

            let sources: Vec<String> = match insert.source.as_deref() {
                Some(query) if !matches!(query.body.as_ref(), SetExpr::Values(_)) => {
                    let select = projection_of(query).ok_or(ColumnError::NoProjection)?;
                    select.projection.iter().map(projection_base).collect()
                }
                _ => vec!["input".to_string(); targets.len()],
            };

            Ok(ColumnLineage {
                target_columns: Some(pair_longest(&targets, &sources)),
                filter_columns: None,
            })
        }

        Statement::Update {
            assignments,
            selection,
            ..
        } => {
            if assignments.is_empty() {
                return Err(ColumnError::NoAssignments);
            }

            let pairs = assignments
                .iter()
                .map(|assignment| {
                    let destination = match &assignment.target {
                        AssignmentTarget::ColumnName(name) => name
                            .0
                            .last()
                            .map(|ident| ident.value.clone())
                            .unwrap_or_else(|| name.to_string()),
                        other => other.to_string(),
                    };
                    format!("{}:{}", destination, expr_base(&assignment.value))
                })
                .collect();

            Ok(ColumnLineage {
                target_columns: Some(pairs),
                filter_columns: selection.as_ref().map(where_columns),
            })
        }

        Statement::Delete(delete) => Ok(ColumnLineage {
            target_columns: None,
            filter_columns: delete.selection.as_ref().map(where_columns),
        }),

        Statement::Merge { on, .. } => match on.as_ref() {
            Expr::BinaryOp { left, right, .. } => Ok(ColumnLineage {
                target_columns: Some(vec![format!("{}:{}", expr_base(left), expr_base(right))]),
                filter_columns: None,
            }),
            other => Err(ColumnError::MergeCondition(other.to_string())),
        },

        Statement::Query(query) => {
            if let Some(inner) = dml_body(query) {
                return extract_columns(inner);
            }

            let select = projection_of(query).ok_or(ColumnError::NoProjection)?;

            let names = match select.projection.first() {
                Some(SelectItem::Wildcard(_)) => vec!["*".to_string()],
                _ => select.projection.iter().map(projection_text).collect(),
            };

            Ok(ColumnLineage {
                target_columns: Some(names),
                filter_columns: select.selection.as_ref().map(where_columns),
            })
        }

        other => Err(ColumnError::Unsupported(
            other.to_string().split_whitespace().next().unwrap_or("statement").to_string(),
        )),
    }
}

/// Like [`extract_columns`], converting a failure into an empty lineage plus a warning
pub fn columns(statement: &Statement) -> (ColumnLineage, Option<Diagnostic>) {
    match extract_columns(statement) {
        Ok(lineage) => (lineage, None),
        Err(err) => {
            tracing::warn!(%err, "column lineage unavailable");
            (
                ColumnLineage::default(),
                Some(Diagnostic::warn(DiagnosticCode::ColumnLineageUnavailable, err.to_string())),
            )
        }
    }
}

/// Leftmost SELECT of a query body
fn projection_of(query: &Query) -> Option<&Select> {
    let mut body = query.body.as_ref();
    loop {
        body = match body {
            SetExpr::Select(select) => return Some(select),
            SetExpr::Query(query) => query.body.as_ref(),
            SetExpr::SetOperation { left, .. } => left.as_ref(),
            _ => return None,
        };
    }
}

/// Zip two column lists, padding the shorter with `*`
fn pair_longest(targets: &[String], sources: &[String]) -> Vec<String> {
    let len = targets.len().max(sources.len());
    (0..len)
        .map(|i| {
            format!(
                "{}:{}",
                targets.get(i).map(String::as_str).unwrap_or("*"),
                sources.get(i).map(String::as_str).unwrap_or("*"),
            )
        })
        .collect()
}

/// Base column name of an expression (`t.col` -> `col`)
fn expr_base(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_default(),
        Expr::Nested(inner) => expr_base(inner),
        other => other.to_string(),
    }
}

/// Name a projection item feeds into an INSERT
fn projection_base(item: &SelectItem) -> String {
    match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr_base(expr),
        _ => "*".to_string(),
    }
}

/// Display name of a projection item in SELECT lineage
fn projection_text(item: &SelectItem) -> String {
    match item {
        SelectItem::UnnamedExpr(expr @ (Expr::Identifier(_) | Expr::CompoundIdentifier(_))) => {
            expr_base(expr)
        }
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr.to_string(),
        other => other.to_string(),
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Some(expr_base(expr)),
        _ => None,
    }
}

/// Operand a predicate node is "about"
fn primary_operand(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::BinaryOp { left, .. } => Some(left),
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::InList { expr, .. }
        | Expr::InSubquery { expr, .. }
        | Expr::Between { expr, .. }
        | Expr::Like { expr, .. }
        | Expr::ILike { expr, .. }
        | Expr::Cast { expr, .. } => Some(expr),
        Expr::IsDistinctFrom(left, _) | Expr::IsNotDistinctFrom(left, _) => Some(left),
        _ => None,
    }
}

fn children(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp { left, right, .. }
        | Expr::IsDistinctFrom(left, right)
        | Expr::IsNotDistinctFrom(left, right) => vec![&**left, &**right],
        Expr::Between { expr, low, high, .. } => vec![&**expr, &**low, &**high],
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => vec![&**expr, &**pattern],
        Expr::InList { expr, list, .. } => std::iter::once(&**expr).chain(list.iter()).collect(),
        other => primary_operand(other).into_iter().collect(),
    }
}

/// WHERE columns, breadth-first
///
/// Stops at the first node without a column operand once at least one
/// column was found.
fn where_columns(root: &Expr) -> Vec<String> {
    let mut names = Vec::new();
    let mut queue = VecDeque::from([root]);

    while let Some(node) = queue.pop_front() {
        match primary_operand(node).and_then(column_name) {
            Some(name) => names.push(name),
            None if !names.is_empty() => break,
            None => {}
        }
        queue.extend(children(node));
    }

    names
}
