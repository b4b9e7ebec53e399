//! Buffer tables
//!
//! A buffer table is written by at least one procedure and read by at
//! least one procedure. Each procedure body is built in isolation, so
//! placeholder names never leak between procedures.

use serde::Serialize;
use sqldeps_core::{is_placeholder, unaliased, DependencyMap, Diagnostic, Edge, OperationKind};
use sqldeps_sql::{extract_dependencies, IdAllocator, SqlParser};
use std::collections::{BTreeMap, BTreeSet};

use crate::procedure::{extract_procedures, graph_name, Procedure};

/// File label for procedures that did not come from a file
const INLINE_SOURCE: &str = "<inline>";

/// A table and the procedures that write and read it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferTable {
    pub name: String,
    pub write_procedures: BTreeSet<String>,
    pub read_procedures: BTreeSet<String>,
}

impl BufferTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Written by some procedure and read by some procedure
    pub fn is_real(&self) -> bool {
        !self.write_procedures.is_empty() && !self.read_procedures.is_empty()
    }
}

/// Accumulates procedure read/write sets across files
pub struct BufferAnalyzer {
    parser: SqlParser,
    tables: BTreeMap<String, BufferTable>,
    edges: Vec<Edge>,
    diagnostics: Vec<Diagnostic>,
    procedures: usize,
}

impl BufferAnalyzer {
    pub fn new(parser: SqlParser) -> Self {
        Self {
            parser,
            tables: BTreeMap::new(),
            edges: Vec::new(),
            diagnostics: Vec::new(),
            procedures: 0,
        }
    }

    /// Seed with buffer tables found earlier
    pub fn with_known(mut self, known: impl IntoIterator<Item = BufferTable>) -> Self {
        for table in known {
            self.tables.insert(table.name.clone(), table);
        }
        self
    }

    /// Extract and analyse every procedure of a SQL text
    ///
    /// Returns the number of procedures found.
    pub fn add_sql(&mut self, sql: &str, file: Option<&str>) -> usize {
        let procedures = extract_procedures(sql);
        tracing::debug!(
            file = file.unwrap_or(INLINE_SOURCE),
            count = procedures.len(),
            "extracted procedures"
        );
        self.add_procedures(&procedures, file);
        procedures.len()
    }

    pub fn add_procedures(&mut self, procedures: &[Procedure], file: Option<&str>) {
        for procedure in procedures {
            self.add_procedure(procedure, file);
        }
    }

    pub fn add_procedure(&mut self, procedure: &Procedure, file: Option<&str>) {
        let (statements, errors) = procedure.parse_statements(&self.parser);
        for error in &errors {
            tracing::warn!(%error, "procedure body not fully analysed");
            self.diagnostics
                .push(error.to_diagnostic(file.unwrap_or(INLINE_SOURCE)));
        }

        let mut ids = IdAllocator::new();
        let output = extract_dependencies(&statements, &mut ids);
        let ctes = &output.ctes;
        let storage = |name: &str| !is_placeholder(name) && !ctes.contains(name);

        for edge in output.dependencies.edges() {
            let target = unaliased(&edge.target);
            let source = unaliased(&edge.source);

            if storage(target) {
                self.table(target)
                    .write_procedures
                    .insert(procedure.name.clone());
            }
            if storage(source) {
                self.table(source)
                    .read_procedures
                    .insert(procedure.name.clone());
            }
            self.edges.push(edge.clone());
        }

        self.procedures += 1;
    }

    fn table(&mut self, name: &str) -> &mut BufferTable {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| BufferTable::new(name))
    }

    /// Tables with both writers and readers, ordered by name
    pub fn buffer_tables(&self) -> Vec<BufferTable> {
        self.tables.values().filter(|t| t.is_real()).cloned().collect()
    }

    /// Raw edges of every procedure analysed so far
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn procedures_analyzed(&self) -> usize {
        self.procedures
    }

    /// Procedure-level dependency map of everything analysed so far
    pub fn dependencies(&self) -> DependencyMap {
        build_dependencies(&self.buffer_tables(), self.edges.iter().cloned())
    }
}

impl Default for BufferAnalyzer {
    fn default() -> Self {
        Self::new(SqlParser::new())
    }
}

/// Find buffer tables among procedures, seeded with tables already known
///
/// Returns the real buffer tables and the raw edges of every procedure.
pub fn find_buffer_tables(
    procedures: &[Procedure],
    known: Vec<BufferTable>,
) -> (Vec<BufferTable>, Vec<Edge>) {
    let mut analyzer = BufferAnalyzer::default().with_known(known);
    analyzer.add_procedures(procedures, None);
    (analyzer.buffer_tables(), analyzer.edges)
}

/// Fold buffer tables and raw edges into one map
///
/// Adds `BufferWrite ($proc$ -> table)` and `BufferRead (table -> $proc$)`
/// edges, then the raw edges with per-target de-duplication on
/// `(source, operation)`.
pub fn build_dependencies<I>(tables: &[BufferTable], edges: I) -> DependencyMap
where
    I: IntoIterator<Item = Edge>,
{
    let mut map = DependencyMap::new();

    for table in tables {
        for writer in &table.write_procedures {
            map.add(Edge::new(graph_name(writer), &table.name, OperationKind::BufferWrite));
        }
        for reader in &table.read_procedures {
            map.add(Edge::new(&table.name, graph_name(reader), OperationKind::BufferRead));
        }
    }

    map.merge_distinct(edges);
    map
}
