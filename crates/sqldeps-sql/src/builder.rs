//! Dependency graph builder
//!
//! Determines the write target of each statement and walks its
//! sub-expressions to find every table or CTE it reads from.
//!
//! Operation policy:
//! - the first `FROM` item of a query feeds the target with the
//!   operation of the slot it sits in (statement op, or `Reference` for
//!   subqueries nested in expressions)
//! - every further comma-separated `FROM` item and every `JOIN` entry
//!   feeds the owning statement's target as `Join`
//! - derived tables are descended with the operation of their slot

use sqlparser::ast::{
    Cte, FromTable, ObjectName, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins,
    Visit, Visitor,
};
use sqldeps_core::{DependencyMap, Diagnostic, DiagnosticCode, Edge, OperationKind};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

use crate::cte::CteRegistry;
use crate::resolver::{entity_name, ReferenceResolver, ResolveError, MAX_REFERENCE_HOPS};
use crate::session::IdAllocator;

/// Edges produced by one statement
#[derive(Debug, Clone, PartialEq)]
pub struct StatementEdges {
    /// Position of the statement in the batch
    pub index: usize,

    /// Write target, when the statement has one
    pub target: Option<String>,

    /// Every edge emitted while processing the statement, CTE bodies included
    pub edges: Vec<Edge>,
}

/// Result of building one batch
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub dependencies: DependencyMap,
    pub diagnostics: Vec<Diagnostic>,
    pub statements: Vec<StatementEdges>,

    /// CTE names defined anywhere in the batch
    pub ctes: BTreeSet<String>,
}

/// Target a group of edges flows into
#[derive(Debug, Clone)]
struct Scope {
    target: String,
    in_update: bool,
}

impl Scope {
    fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            in_update: false,
        }
    }

    fn updating(mut self) -> Self {
        self.in_update = true;
        self
    }
}

/// Collects subqueries nested in expressions, skipping derived tables
#[derive(Default)]
struct SubqueryCollector {
    depth: usize,
    derived_pending: bool,
    found: Vec<Query>,
}

impl Visitor for SubqueryCollector {
    type Break = ();

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if self.depth == 0 && matches!(factor, TableFactor::Derived { .. }) {
            self.derived_pending = true;
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            if self.derived_pending {
                // Body of a derived table; the FROM walk handles it
                self.derived_pending = false;
            } else {
                self.found.push(query.clone());
            }
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }
}

fn expression_subqueries<V: Visit>(node: &V) -> Vec<Query> {
    let mut collector = SubqueryCollector::default();
    let _ = node.visit(&mut collector);
    collector.found
}

/// Collects the outermost table factors of a FROM-like clause, in order
#[derive(Default)]
struct FactorCollector {
    query_depth: usize,
    factor_depth: usize,
    found: Vec<TableFactor>,
}

impl Visitor for FactorCollector {
    type Break = ();

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if self.query_depth == 0 && self.factor_depth == 0 {
            self.found.push(factor.clone());
        }
        self.factor_depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_table_factor(&mut self, _factor: &TableFactor) -> ControlFlow<Self::Break> {
        self.factor_depth = self.factor_depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.query_depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.query_depth = self.query_depth.saturating_sub(1);
        ControlFlow::Continue(())
    }
}

fn top_level_factors<V: Visit>(node: &V) -> Vec<TableFactor> {
    let mut collector = FactorCollector::default();
    let _ = node.visit(&mut collector);
    collector.found
}

fn select_into(query: &Query) -> Option<&ObjectName> {
    match query.body.as_ref() {
        SetExpr::Select(select) => select.into.as_ref().map(|into| &into.name),
        _ => None,
    }
}

/// Statement wrapped by a `WITH ... INSERT` or `WITH ... UPDATE` query
pub(crate) fn dml_body(query: &Query) -> Option<&Statement> {
    match query.body.as_ref() {
        SetExpr::Insert(statement) | SetExpr::Update(statement) => Some(statement),
        _ => None,
    }
}

/// Leading keywords of a statement, for diagnostics
fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the dependency map of one batch of statements
pub struct DependencyBuilder<'a> {
    registry: &'a CteRegistry,
    ids: &'a mut IdAllocator,
    dependencies: DependencyMap,
    diagnostics: Vec<Diagnostic>,
    statements: Vec<StatementEdges>,
    statement: usize,
    current: Vec<Edge>,
    max_hops: usize,
}

impl<'a> DependencyBuilder<'a> {
    pub fn new(registry: &'a CteRegistry, ids: &'a mut IdAllocator) -> Self {
        Self {
            registry,
            ids,
            dependencies: DependencyMap::new(),
            diagnostics: Vec::new(),
            statements: Vec::new(),
            statement: 0,
            current: Vec::new(),
            max_hops: MAX_REFERENCE_HOPS,
        }
    }

    /// Override the hop bound used when resolving references
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Process every statement and return the accumulated map
    pub fn build(mut self, statements: &[Statement]) -> BuildOutput {
        for (index, statement) in statements.iter().enumerate() {
            self.statement = index;
            let target = self.process_statement(statement);
            let edges = std::mem::take(&mut self.current);

            self.statements.push(StatementEdges {
                index,
                target,
                edges,
            });
        }

        BuildOutput {
            dependencies: self.dependencies,
            diagnostics: self.diagnostics,
            statements: self.statements,
            ctes: self.registry.names().clone(),
        }
    }

    fn process_statement(&mut self, statement: &Statement) -> Option<String> {
        match statement {
            // WITH ... INSERT / UPDATE
            Statement::Query(query) if dml_body(query).is_some() => {
                if let Some(with) = &query.with {
                    for cte in &with.cte_tables {
                        self.process_cte(cte);
                    }
                }
                dml_body(query).and_then(|inner| self.process_statement(inner))
            }

            Statement::Query(query) => {
                let target = match select_into(query) {
                    Some(into) => entity_name(into),
                    None => self.ids.next_result(),
                };
                self.process_query(query, &Scope::new(target.clone()), OperationKind::Select);
                Some(target)
            }

            Statement::Insert(insert) => {
                let target = entity_name(&insert.table_name);
                let scope = Scope::new(target.clone());

                match insert.source.as_deref() {
                    Some(source) => {
                        if matches!(source.body.as_ref(), SetExpr::Values(_)) {
                            self.add_input(&scope);
                        }
                        self.process_query(source, &scope, OperationKind::Insert);
                    }
                    // DEFAULT VALUES
                    None => self.add_input(&scope),
                }
                Some(target)
            }

            Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                let target = self.target_name(&table.relation);
                let scope = Scope::new(target.clone()).updating();

                for join in &table.joins {
                    self.process_factor(&join.relation, &scope, OperationKind::Join);
                }

                for (i, factor) in top_level_factors(from).iter().enumerate() {
                    let operation = if i == 0 { OperationKind::Update } else { OperationKind::Join };
                    self.process_factor(factor, &scope, operation);
                }

                let mut nested = expression_subqueries(table);
                nested.extend(expression_subqueries(assignments));
                nested.extend(expression_subqueries(from));
                nested.extend(expression_subqueries(selection));
                self.process_references(&nested, &scope);

                Some(target)
            }

            Statement::Delete(delete) => {
                let from_items = match &delete.from {
                    FromTable::WithFromKeyword(items) | FromTable::WithoutKeyword(items) => items,
                };

                let (target, target_in_from) = match (delete.tables.first(), from_items.first()) {
                    (Some(name), _) => (entity_name(name), false),
                    (None, Some(first)) => (self.target_name(&first.relation), true),
                    (None, None) => {
                        self.unsupported(DiagnosticCode::UnsupportedNode, "DELETE without a target table");
                        return None;
                    }
                };
                let scope = Scope::new(target.clone());

                for (i, item) in from_items.iter().enumerate() {
                    match i {
                        0 if target_in_from => {}
                        0 => self.process_factor(&item.relation, &scope, OperationKind::Delete),
                        _ => self.process_factor(&item.relation, &scope, OperationKind::Join),
                    }
                    for join in &item.joins {
                        self.process_factor(&join.relation, &scope, OperationKind::Join);
                    }
                }

                if let Some(using) = &delete.using {
                    for item in using {
                        self.process_table_with_joins(item, &scope, OperationKind::Delete);
                    }
                }

                let mut nested = expression_subqueries(from_items);
                nested.extend(expression_subqueries(&delete.using));
                nested.extend(expression_subqueries(&delete.selection));
                self.process_references(&nested, &scope);

                Some(target)
            }

            Statement::Merge {
                table,
                source,
                on,
                clauses,
                ..
            } => {
                let target = self.target_name(table);
                let scope = Scope::new(target.clone());

                self.process_factor(source, &scope, OperationKind::Merge);

                let mut nested = expression_subqueries(on);
                nested.extend(expression_subqueries(clauses));
                self.process_references(&nested, &scope);

                Some(target)
            }

            Statement::CreateTable(create) => {
                let target = entity_name(&create.name);
                self.dependencies.ensure_node(target.clone());

                if let Some(query) = &create.query {
                    self.process_query(query, &Scope::new(target.clone()), OperationKind::Create);
                }
                Some(target)
            }

            Statement::CreateView { name, query, .. } => {
                let target = entity_name(name);
                self.dependencies.ensure_node(target.clone());
                self.process_query(query, &Scope::new(target.clone()), OperationKind::Create);
                Some(target)
            }

            Statement::AlterTable { name, operations, .. } => {
                let target = entity_name(name);
                self.dependencies.ensure_node(target.clone());

                // Subqueries in CHECK constraints or column defaults
                let scope = Scope::new(target.clone());
                for query in expression_subqueries(operations) {
                    self.process_query(&query, &scope, OperationKind::Alter);
                }
                Some(target)
            }

            Statement::Drop { .. } => {
                tracing::debug!(statement = self.statement, "skipping DROP");
                None
            }

            other => {
                let message = format!("skipped unsupported statement: {}", statement_kind(other));
                self.unsupported(DiagnosticCode::UnsupportedStatement, &message);
                None
            }
        }
    }

    fn process_query(&mut self, query: &Query, scope: &Scope, operation: OperationKind) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.process_cte(cte);
            }
        }

        self.process_set_expr(&query.body, scope, operation);

        let nested = expression_subqueries(&query.order_by);
        self.process_references(&nested, scope);
    }

    fn process_cte(&mut self, cte: &Cte) {
        let name = cte.alias.name.value.clone();

        if self.registry.is_recursive(&name) {
            let edge = Edge::new(name.clone(), name.clone(), OperationKind::Select).recursive();
            self.record(edge);
        }

        self.process_query(&cte.query, &Scope::new(name), OperationKind::Select);
    }

    fn process_set_expr(&mut self, set_expr: &SetExpr, scope: &Scope, operation: OperationKind) {
        match set_expr {
            SetExpr::Select(select) => self.process_select(select, scope, operation),
            SetExpr::Query(query) => self.process_query(query, scope, operation),
            SetExpr::SetOperation { left, right, .. } => {
                self.process_set_expr(left, scope, operation);
                self.process_set_expr(right, scope, operation);
            }
            SetExpr::Values(values) => {
                let nested = expression_subqueries(values);
                self.process_references(&nested, scope);
            }
            other => {
                let message = format!("skipped set expression: {}", other);
                self.unsupported(DiagnosticCode::UnsupportedNode, &message);
            }
        }
    }

    fn process_select(&mut self, select: &Select, scope: &Scope, operation: OperationKind) {
        for (i, item) in select.from.iter().enumerate() {
            let slot = if i == 0 { operation } else { OperationKind::Join };
            self.process_table_with_joins(item, scope, slot);
        }

        let nested = expression_subqueries(select);
        self.process_references(&nested, scope);
    }

    fn process_table_with_joins(&mut self, item: &TableWithJoins, scope: &Scope, operation: OperationKind) {
        self.process_factor(&item.relation, scope, operation);
        for join in &item.joins {
            self.process_factor(&join.relation, scope, OperationKind::Join);
        }
    }

    fn process_factor(&mut self, factor: &TableFactor, scope: &Scope, operation: OperationKind) {
        match factor {
            TableFactor::Derived { subquery, .. } => self.process_query(subquery, scope, operation),
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.process_table_with_joins(table_with_joins, scope, operation)
            }
            _ => {
                let source = self.resolve(factor);
                self.add_edge(source, operation, scope);
            }
        }
    }

    fn process_references(&mut self, queries: &[Query], scope: &Scope) {
        for query in queries {
            self.process_query(query, scope, OperationKind::Reference);
        }
    }

    /// Name of a statement's write target; aliases are not rendered
    fn target_name(&mut self, factor: &TableFactor) -> String {
        match factor {
            TableFactor::Table { name, .. } => entity_name(name),
            _ => self.resolve(factor),
        }
    }

    /// Resolve a factor, substituting `unknown N` on failure
    fn resolve(&mut self, factor: &TableFactor) -> String {
        let resolver = ReferenceResolver::new(self.registry.names()).with_max_hops(self.max_hops);
        match resolver.resolve_factor(factor) {
            Ok(resolved) => resolved.render(),
            Err(err) => {
                let code = match err {
                    ResolveError::HopLimitExceeded(_) => DiagnosticCode::TraversalLimitExceeded,
                    ResolveError::Unresolved(_) => DiagnosticCode::UnresolvedReference,
                };
                let placeholder = self.ids.next_unknown();
                tracing::warn!(%err, %placeholder, "substituting placeholder for unresolved reference");

                self.diagnostics.push(
                    Diagnostic::warn(code, format!("{}; using '{}'", err, placeholder))
                        .with_statement(self.statement),
                );
                placeholder
            }
        }
    }

    fn add_input(&mut self, scope: &Scope) {
        let input = self.ids.next_input();
        self.add_edge(input, OperationKind::Insert, scope);
    }

    fn add_edge(&mut self, source: String, operation: OperationKind, scope: &Scope) {
        let edge = if source == scope.target {
            if scope.in_update {
                Edge::new(source, scope.target.clone(), OperationKind::Update).internal_update()
            } else {
                tracing::debug!(%source, %operation, "dropped self-reference");
                return;
            }
        } else {
            let edge = Edge::new(source, scope.target.clone(), operation);
            if self.registry.forms_cycle(&edge.source, &edge.target) {
                edge.recursive()
            } else {
                edge
            }
        };

        self.record(edge);
    }

    fn record(&mut self, edge: Edge) {
        if self.dependencies.add(edge.clone()) {
            tracing::debug!(%edge, "dependency added");
        }
        self.current.push(edge);
    }

    fn unsupported(&mut self, code: DiagnosticCode, message: &str) {
        tracing::debug!(statement = self.statement, "{}", message);
        self.diagnostics
            .push(Diagnostic::info(code, message).with_statement(self.statement));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;

    fn build(sql: &str) -> BuildOutput {
        build_with_hops(sql, MAX_REFERENCE_HOPS)
    }

    fn build_with_hops(sql: &str, max_hops: usize) -> BuildOutput {
        let parsed = SqlParser::new().parse(sql, None).unwrap();
        let registry = CteRegistry::analyze(&parsed.statements);
        let mut ids = IdAllocator::new();
        DependencyBuilder::new(&registry, &mut ids)
            .with_max_hops(max_hops)
            .build(&parsed.statements)
    }

    fn edges(output: &BuildOutput) -> BTreeSet<(String, String, OperationKind)> {
        output
            .dependencies
            .edges()
            .map(|e| (e.source.clone(), e.target.clone(), e.operation))
            .collect()
    }

    fn edge(source: &str, target: &str, operation: OperationKind) -> (String, String, OperationKind) {
        (source.to_string(), target.to_string(), operation)
    }

    #[test]
    fn joins_feed_statement_target() {
        let output = build(
            "INSERT INTO report SELECT o.id FROM orders o JOIN customers c ON o.cid = c.id, regions r",
        );

        assert_eq!(
            edges(&output),
            [
                edge("orders (o)", "report", OperationKind::Insert),
                edge("customers (c)", "report", OperationKind::Join),
                edge("regions (r)", "report", OperationKind::Join),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn where_subquery_is_reference() {
        let output = build("SELECT * FROM a WHERE id IN (SELECT a_id FROM b JOIN c ON b.x = c.x)");

        assert_eq!(
            edges(&output),
            [
                edge("a", "result 0", OperationKind::Select),
                edge("b", "result 0", OperationKind::Reference),
                edge("c", "result 0", OperationKind::Join),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn derived_table_not_double_counted() {
        let output = build("SELECT * FROM (SELECT id FROM events) e JOIN (SELECT id FROM users) u ON e.id = u.id");

        assert_eq!(
            edges(&output),
            [
                edge("events", "result 0", OperationKind::Select),
                edge("users", "result 0", OperationKind::Join),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn update_self_reference_is_internal() {
        let output = build("UPDATE stock SET qty = (SELECT max(qty) FROM stock) WHERE id = 1");

        let edges: Vec<_> = output.dependencies.edges().cloned().collect();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].is_internal_update);
        assert_eq!(edges[0].operation, OperationKind::Update);
        assert_eq!(edges[0].source, "stock");
    }

    #[test]
    fn create_table_without_query_registers_node() {
        let output = build("CREATE TABLE t (id INT)");

        assert_eq!(output.dependencies.get("t").map(|e| e.len()), Some(0));
        assert_eq!(output.statements[0].target.as_deref(), Some("t"));
    }

    #[test]
    fn create_view_uses_create_operation() {
        let output = build("CREATE VIEW v AS SELECT * FROM base JOIN dim ON base.k = dim.k");

        assert_eq!(
            edges(&output),
            [
                edge("base", "v", OperationKind::Create),
                edge("dim", "v", OperationKind::Join),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn derived_tables_without_tables_add_nothing() {
        let output = build("SELECT * FROM (SELECT 1) x, (VALUES (1)) y");

        assert!(output.dependencies.is_empty());
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn table_function_gets_placeholder() {
        let output = build("SELECT * FROM UNNEST(ARRAY[1, 2]) AS u(n)");

        assert!(output.dependencies.contains("unknown 0", "result 0", OperationKind::Select));
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].code, DiagnosticCode::UnresolvedReference);
    }

    #[test]
    fn unsupported_statement_is_reported() {
        let output = build("GRANT SELECT ON t TO reader");

        assert!(output.dependencies.is_empty());
        assert_eq!(output.diagnostics[0].code, DiagnosticCode::UnsupportedStatement);
        assert_eq!(output.statements[0].target, None);
    }

    #[test]
    fn alter_registers_node_and_embedded_queries() {
        let output = build(
            "ALTER TABLE orders ADD COLUMN region TEXT; \
             ALTER TABLE orders ADD CONSTRAINT known_region CHECK (region IN (SELECT code FROM regions))",
        );

        assert_eq!(output.statements[0].target.as_deref(), Some("orders"));
        assert!(output.dependencies.contains("regions", "orders", OperationKind::Alter));
    }

    #[test]
    fn output_carries_cte_names() {
        let output = build("WITH staged AS (SELECT * FROM raw) INSERT INTO clean SELECT * FROM staged");

        assert_eq!(output.ctes, BTreeSet::from(["staged".to_string()]));
        assert!(output.dependencies.contains("staged", "clean", OperationKind::Insert));
    }

    #[test]
    fn drop_is_skipped_silently() {
        let output = build("DROP TABLE t");

        assert!(output.dependencies.is_empty());
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn delete_using_and_where_subquery() {
        let output = build(
            "DELETE FROM orders USING archived a WHERE orders.id = a.id AND orders.cid IN (SELECT id FROM banned)",
        );

        assert_eq!(
            edges(&output),
            [
                edge("archived (a)", "orders", OperationKind::Delete),
                edge("banned", "orders", OperationKind::Reference),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn merge_derived_source_is_walked() {
        let output = build(
            "MERGE INTO t USING (SELECT a.id FROM a JOIN b ON a.id = b.id WHERE a.k IN (SELECT k FROM c)) s \
             ON t.id = s.id WHEN MATCHED THEN UPDATE SET x = s.id",
        );

        assert_eq!(
            edges(&output),
            [
                edge("a", "t", OperationKind::Merge),
                edge("b", "t", OperationKind::Join),
                edge("c", "t", OperationKind::Reference),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn hop_limit_substitutes_unknown_placeholder() {
        // Derived tables are descended by the builder, so only a zero bound
        // stops the resolver before it names `events`
        let output = build_with_hops("INSERT INTO sink SELECT * FROM (SELECT id FROM events) e", 0);

        assert!(output.dependencies.contains("unknown 0", "sink", OperationKind::Insert));
        assert!(!output.dependencies.contains("events", "sink", OperationKind::Insert));
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].code, DiagnosticCode::TraversalLimitExceeded);
        assert_eq!(output.diagnostics[0].statement, Some(0));
    }
}
