//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Input issues (1xxx)
    /// Failed to parse SQL under every configured dialect
    SqlParseError,

    /// Input was empty or not SQL text at all
    InvalidInput,

    /// A source file could not be read
    FileReadError,

    // Extraction issues (2xxx)
    /// Statement kind does not produce dependencies and was skipped
    UnsupportedStatement,

    /// A sub-expression had an unexpected shape and was skipped
    UnsupportedNode,

    /// A table reference could not be resolved; a placeholder was used
    UnresolvedReference,

    /// Reference chain exceeded the traversal bound
    TraversalLimitExceeded,

    // Refinement issues (3xxx)
    /// Column-level lineage could not be derived for an edge
    ColumnLineageUnavailable,

    /// A procedure block was found but its body could not be extracted
    ProcedureBodyMissing,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlParseError => "SQL_PARSE_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::FileReadError => "FILE_READ_ERROR",
            Self::UnsupportedStatement => "UNSUPPORTED_STATEMENT",
            Self::UnsupportedNode => "UNSUPPORTED_NODE",
            Self::UnresolvedReference => "UNRESOLVED_REFERENCE",
            Self::TraversalLimitExceeded => "TRAVERSAL_LIMIT_EXCEEDED",
            Self::ColumnLineageUnavailable => "COLUMN_LINEAGE_UNAVAILABLE",
            Self::ProcedureBodyMissing => "PROCEDURE_BODY_MISSING",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - extraction continued with a best-effort result
    Warn,

    /// Error - the unit produced no dependencies
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path as given on the command line
    pub file: String,

    /// Optional statement index within the file (0-indexed)
    pub statement: Option<usize>,

    /// Optional procedure the statement belongs to
    pub procedure: Option<String>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            statement: None,
            procedure: None,
        }
    }

    /// Create a location pointing at one statement of a file
    pub fn with_statement(file: impl Into<String>, statement: usize) -> Self {
        Self {
            file: file.into(),
            statement: Some(statement),
            procedure: None,
        }
    }

    /// Attach the enclosing procedure name
    pub fn in_procedure(mut self, procedure: impl Into<String>) -> Self {
        self.procedure = Some(procedure.into());
        self
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(procedure) = &self.procedure {
            write!(f, " [{}]", procedure)?;
        }
        if let Some(statement) = self.statement {
            write!(f, " #{}", statement)?;
        }
        Ok(())
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Statement index within the analysed unit
    pub statement: Option<usize>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            statement: None,
        }
    }

    /// Shorthand for a warning-level diagnostic
    pub fn warn(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warn, message)
    }

    /// Shorthand for an info-level diagnostic
    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Info, message)
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the statement index
    pub fn with_statement(mut self, index: usize) -> Self {
        self.statement = Some(index);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)
    }
}
