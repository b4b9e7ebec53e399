//! Analysis sessions
//!
//! A [`LineageSession`] owns the configuration, the parser and the
//! placeholder counters, and turns SQL text into an [`Analysis`].

use serde::Serialize;
use sqlparser::ast::Statement;
use sqldeps_core::{
    Config, CounterScope, DependencyMap, Diagnostic, DiagnosticCode, DialectConfig, Edge,
    EdgeFilter, Location, Severity,
};
use std::collections::BTreeMap;
use std::path::Path;

use crate::builder::{BuildOutput, DependencyBuilder};
use crate::columns::{columns, ColumnLineage};
use crate::cte::CteRegistry;
use crate::parser::SqlParser;

/// Counters for `result N`, `input N` and `unknown N` placeholders
///
/// Each kind counts independently from 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    result: usize,
    input: usize,
    unknown: usize,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_result(&mut self) -> String {
        Self::take(&mut self.result, "result")
    }

    pub fn next_input(&mut self) -> String {
        Self::take(&mut self.input, "input")
    }

    pub fn next_unknown(&mut self) -> String {
        Self::take(&mut self.unknown, "unknown")
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn take(counter: &mut usize, kind: &str) -> String {
        let id = *counter;
        *counter += 1;
        format!("{} {}", kind, id)
    }
}

/// Build the dependencies of a batch with the given counters
pub fn extract_dependencies(statements: &[Statement], ids: &mut IdAllocator) -> BuildOutput {
    let registry = CteRegistry::analyze(statements);
    DependencyBuilder::new(&registry, ids).build(statements)
}

/// Column lineage of one edge, in serializable form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnEntry {
    pub edge: Edge,
    #[serde(flatten)]
    pub lineage: ColumnLineage,
}

/// Result of analysing one unit of SQL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub dependencies: DependencyMap,

    /// Column detail for statement edges (only with column lineage enabled)
    pub columns: BTreeMap<Edge, ColumnLineage>,

    pub diagnostics: Vec<Diagnostic>,

    /// Dialect that parsed the text, if any did
    pub dialect: Option<DialectConfig>,
}

impl Analysis {
    /// Analysis with no edges and a single diagnostic
    pub fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Fold another analysis into this one
    pub fn merge(&mut self, other: Analysis) {
        self.dependencies.merge(other.dependencies);
        self.columns.extend(other.columns);
        self.diagnostics.extend(other.diagnostics);
        if self.dialect.is_none() {
            self.dialect = other.dialect;
        }
    }

    /// Copy keeping only the edges (and their column detail) the filter allows
    pub fn filtered(&self, filter: &EdgeFilter) -> Analysis {
        let dependencies = self.dependencies.filtered(filter);
        let columns = self
            .columns
            .iter()
            .filter(|(edge, _)| filter.allows(edge))
            .map(|(edge, lineage)| (edge.clone(), lineage.clone()))
            .collect();

        Analysis {
            dependencies,
            columns,
            diagnostics: self.diagnostics.clone(),
            dialect: self.dialect,
        }
    }

    /// Attach a file location to diagnostics that have none
    pub fn locate(mut self, file: &str) -> Self {
        for diagnostic in &mut self.diagnostics {
            if diagnostic.location.is_none() {
                diagnostic.location = Some(Location {
                    file: file.to_string(),
                    statement: diagnostic.statement,
                    procedure: None,
                });
            }
        }
        self
    }

    pub fn column_entries(&self) -> Vec<ColumnEntry> {
        self.columns
            .iter()
            .map(|(edge, lineage)| ColumnEntry {
                edge: edge.clone(),
                lineage: lineage.clone(),
            })
            .collect()
    }
}

/// Stateful analysis session
pub struct LineageSession {
    config: Config,
    parser: SqlParser,
    ids: IdAllocator,
    units: usize,
}

impl LineageSession {
    pub fn new(config: Config) -> Self {
        Self {
            parser: SqlParser::with_dialects(config.dialects.clone()),
            config,
            ids: IdAllocator::new(),
            units: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn parser(&self) -> &SqlParser {
        &self.parser
    }

    /// Current counter state
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Number of units analysed so far
    pub fn units_analyzed(&self) -> usize {
        self.units
    }

    /// Parse and analyse SQL text
    pub fn analyze_sql(&mut self, sql: &str) -> Analysis {
        self.begin_unit();

        let analysis = match self.parser.parse(sql, None) {
            Ok(parsed) => self.run(&parsed.statements, Some(parsed.dialect)),
            Err(err) => {
                tracing::warn!(%err, "SQL unit rejected");
                Analysis::failed(err.to_diagnostic())
            }
        };

        self.finish(analysis)
    }

    /// Read and analyse a SQL file
    pub fn analyze_file(&mut self, path: &Path) -> Analysis {
        let file = path.display().to_string();

        match std::fs::read_to_string(path) {
            Ok(sql) => self.analyze_sql(&sql).locate(&file),
            Err(err) => {
                self.begin_unit();
                let diagnostic = Diagnostic::new(
                    DiagnosticCode::FileReadError,
                    Severity::Error,
                    format!("Failed to read file: {}", err),
                )
                .with_location(Location::new(file));
                self.finish(Analysis::failed(diagnostic))
            }
        }
    }

    /// Analyse statements that were parsed elsewhere
    pub fn analyze_statements(&mut self, statements: &[Statement]) -> Analysis {
        self.begin_unit();
        let analysis = self.run(statements, None);
        self.finish(analysis)
    }

    fn begin_unit(&mut self) {
        if self.config.counter_scope == CounterScope::Isolated {
            self.ids.reset();
        }
        self.units += 1;
    }

    fn run(&mut self, statements: &[Statement], dialect: Option<DialectConfig>) -> Analysis {
        let output = extract_dependencies(statements, &mut self.ids);
        let mut analysis = Analysis {
            dependencies: output.dependencies,
            columns: BTreeMap::new(),
            diagnostics: output.diagnostics,
            dialect,
        };

        if self.config.column_lineage {
            for produced in &output.statements {
                let Some(target) = &produced.target else { continue };
                let Some(statement) = statements.get(produced.index) else { continue };

                let statement_edges: Vec<&Edge> = produced
                    .edges
                    .iter()
                    .filter(|edge| &edge.target == target && edge.operation.is_statement_op())
                    .collect();
                if statement_edges.is_empty() {
                    continue;
                }

                let (lineage, diagnostic) = columns(statement);
                if let Some(diagnostic) = diagnostic {
                    analysis.diagnostics.push(diagnostic.with_statement(produced.index));
                }
                for edge in statement_edges {
                    analysis.columns.insert(edge.clone(), lineage.clone());
                }
            }
        }

        analysis
    }

    fn finish(&self, mut analysis: Analysis) -> Analysis {
        for diagnostic in &mut analysis.diagnostics {
            diagnostic.severity = self
                .config
                .severity
                .get_severity(diagnostic.code, diagnostic.severity);
        }

        tracing::info!(
            unit = self.units,
            edges = analysis.dependencies.len(),
            diagnostics = analysis.diagnostics.len(),
            "analysed SQL unit"
        );
        analysis
    }
}

impl Default for LineageSession {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqldeps_core::OperationKind;

    #[test]
    fn placeholder_kinds_count_independently() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_result(), "result 0");
        assert_eq!(ids.next_result(), "result 1");
        assert_eq!(ids.next_input(), "input 0");
        assert_eq!(ids.next_unknown(), "unknown 0");

        ids.reset();
        assert_eq!(ids.next_result(), "result 0");
    }

    #[test]
    fn isolated_scope_resets_per_unit() {
        let mut session = LineageSession::default();

        let first = session.analyze_sql("SELECT * FROM a");
        let second = session.analyze_sql("SELECT * FROM b");

        assert!(first.dependencies.contains("a", "result 0", OperationKind::Select));
        assert!(second.dependencies.contains("b", "result 0", OperationKind::Select));
        assert_eq!(session.units_analyzed(), 2);
    }

    #[test]
    fn accumulating_scope_keeps_counting() {
        let config = Config {
            counter_scope: CounterScope::Accumulating,
            ..Config::default()
        };
        let mut session = LineageSession::new(config);

        session.analyze_sql("SELECT * FROM a");
        let second = session.analyze_sql("SELECT * FROM b");

        assert!(second.dependencies.contains("b", "result 1", OperationKind::Select));
    }

    #[test]
    fn parse_failure_yields_single_diagnostic() {
        let mut session = LineageSession::default();
        let analysis = session.analyze_sql("SELEC * FORM nowhere");

        assert!(analysis.dependencies.is_empty());
        assert_eq!(analysis.diagnostics.len(), 1);
        assert!(analysis.diagnostics[0].message.starts_with("Error parsing SQL:"));
        assert!(analysis.has_errors());
        assert_eq!(analysis.dialect, None);
    }

    #[test]
    fn column_lineage_attached_to_statement_edges() {
        let config = Config {
            column_lineage: true,
            ..Config::default()
        };
        let mut session = LineageSession::new(config);
        let analysis = session.analyze_sql(
            "INSERT INTO t (a) SELECT s.x FROM s JOIN r ON s.id = r.id",
        );

        let insert_edge = Edge::new("s", "t", OperationKind::Insert);
        let join_edge = Edge::new("r", "t", OperationKind::Join);

        assert_eq!(
            analysis.columns.get(&insert_edge).and_then(|l| l.target_columns.clone()),
            Some(vec!["a:x".to_string()])
        );
        assert!(!analysis.columns.contains_key(&join_edge));
    }

    #[test]
    fn severity_overrides_apply() {
        let mut config = Config::default();
        config
            .severity
            .set_override(DiagnosticCode::UnsupportedStatement, Severity::Error);
        let mut session = LineageSession::new(config);

        let analysis = session.analyze_sql("GRANT SELECT ON t TO reader");
        assert_eq!(analysis.diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn missing_file_is_reported() {
        let mut session = LineageSession::default();
        let analysis = session.analyze_file(Path::new("/definitely/not/here.sql"));

        assert_eq!(analysis.diagnostics[0].code, DiagnosticCode::FileReadError);
        assert_eq!(
            analysis.diagnostics[0].location.as_ref().map(|l| l.file.as_str()),
            Some("/definitely/not/here.sql")
        );
    }
}
