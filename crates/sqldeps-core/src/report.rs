//! Report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use crate::diagnostic::{Diagnostic, Severity};
use crate::graph::DependencyMap;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Summary statistics for a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of diagnostics
    pub total: usize,

    /// Number of errors
    pub errors: usize,

    /// Number of warnings
    pub warnings: usize,

    /// Number of info messages
    pub info: usize,

    /// Number of SQL files or text units analysed
    pub units_analyzed: usize,

    /// Number of distinct entities in the dependency map
    pub nodes: usize,

    /// Number of edges in the dependency map
    pub edges: usize,
}

/// Dependency report (report.json v1)
///
/// This is the stable output format.
/// All fields are versioned and backward-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: ReportSummary,

    /// Target-indexed dependency edges
    pub dependencies: DependencyMap,

    /// All diagnostics
    pub diagnostics: Vec<Diagnostic>,

    /// Metadata (buffer tables, column lineage, traversal results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Report {
    /// Create a new empty report
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary::default(),
            dependencies: DependencyMap::new(),
            diagnostics: Vec::new(),
            metadata: None,
        }
    }

    /// Create a report from a dependency map and its diagnostics
    pub fn from_analysis(dependencies: DependencyMap, diagnostics: Vec<Diagnostic>, units_analyzed: usize) -> Self {
        let mut report = Self::new();
        report.summary.units_analyzed = units_analyzed;
        report.set_dependencies(dependencies);
        for diagnostic in diagnostics {
            report.add_diagnostic(diagnostic);
        }
        report
    }

    /// Replace the dependency map and refresh node/edge counts
    pub fn set_dependencies(&mut self, dependencies: DependencyMap) {
        self.summary.nodes = dependencies.nodes().len();
        self.summary.edges = dependencies.len();
        self.dependencies = dependencies;
    }

    /// Add a diagnostic to the report
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.summary.errors += 1,
            Severity::Warn => self.summary.warnings += 1,
            Severity::Info => self.summary.info += 1,
        }

        self.summary.total += 1;
        self.diagnostics.push(diagnostic);
    }

    /// Attach free-form metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticCode;
    use crate::graph::{Edge, OperationKind};

    #[test]
    fn empty_report() {
        let report = Report::new();
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.summary.total, 0);
        assert!(report.dependencies.is_empty());
        assert!(!report.has_errors());
    }

    #[test]
    fn report_with_diagnostics() {
        let dependencies: DependencyMap = vec![
            Edge::new("s", "t", OperationKind::Insert),
            Edge::new("j", "t", OperationKind::Join),
        ]
        .into_iter()
        .collect();
        let diagnostics = vec![
            Diagnostic::new(DiagnosticCode::SqlParseError, Severity::Error, "Error parsing SQL: oops"),
            Diagnostic::info(DiagnosticCode::UnsupportedStatement, "skipped SET"),
        ];

        let report = Report::from_analysis(dependencies, diagnostics, 2);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.info, 1);
        assert_eq!(report.summary.units_analyzed, 2);
        assert_eq!(report.summary.edges, 2);
        assert_eq!(report.summary.nodes, 3);
        assert!(report.has_errors());
    }

    #[test]
    fn report_serialization() {
        let dependencies: DependencyMap = std::iter::once(Edge::new("s", "t", OperationKind::Insert)).collect();
        let report = Report::from_analysis(dependencies, Vec::new(), 1)
            .with_metadata(serde_json::json!({ "mode": "tables" }));

        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"dependencies\""));
        assert!(json.contains("\"insert\""));
        assert!(json.contains("\"mode\""));

        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dependencies, report.dependencies);
    }
}
