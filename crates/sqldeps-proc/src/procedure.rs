//! Procedure extraction
//!
//! Finds `CREATE PROCEDURE`/`CREATE FUNCTION` blocks with dollar-quoted
//! bodies and trims each body down to its `BEGIN ... END` block.

use regex::Regex;
use sqldeps_core::{Diagnostic, DiagnosticCode, Location};
use sqldeps_sql::{ParseError, SqlParser};
use sqlparser::ast::Statement;
use std::sync::LazyLock;

static PROCEDURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(?:PROCEDURE|FUNCTION)\s+["'?]?((?:\w+\.)*\w+)["'?]?\s*\(.*?\)\s*[^$]+?\$\$(.*?)\$\$"#)
        .expect("procedure pattern is valid")
});

static BEGIN_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBEGIN\b").expect("BEGIN pattern is valid"));

static END_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEND\b").expect("END pattern is valid"));

/// Procedure errors
#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    #[error("procedure {procedure}: {source}")]
    Parse {
        procedure: String,
        #[source]
        source: ParseError,
    },

    #[error("procedure {0} has an empty body")]
    EmptyBody(String),
}

impl ProcedureError {
    pub fn procedure(&self) -> &str {
        match self {
            Self::Parse { procedure, .. } => procedure,
            Self::EmptyBody(procedure) => procedure,
        }
    }

    /// Convert to a diagnostic located in `file`
    pub fn to_diagnostic(&self, file: &str) -> Diagnostic {
        let location = Location::new(file).in_procedure(self.procedure());

        match self {
            Self::Parse { source, .. } => source.to_diagnostic().with_location(location),
            Self::EmptyBody(_) => {
                Diagnostic::warn(DiagnosticCode::ProcedureBodyMissing, self.to_string())
                    .with_location(location)
            }
        }
    }
}

/// A stored procedure or function and its executable body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    pub body: String,
}

impl Procedure {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    /// Node name of the procedure in a dependency graph
    pub fn graph_name(&self) -> String {
        graph_name(&self.name)
    }

    /// Parse the body into statements
    ///
    /// Bodies often mix plain SQL with procedural statements no dialect
    /// accepts. When the whole body fails to parse, each `;`-separated
    /// chunk is parsed on its own and the chunks that fail are reported.
    pub fn parse_statements(&self, parser: &SqlParser) -> (Vec<Statement>, Vec<ProcedureError>) {
        if self.body.trim().is_empty() {
            return (Vec::new(), vec![ProcedureError::EmptyBody(self.name.clone())]);
        }

        let whole_error = match parser.parse(&self.body, None) {
            Ok(parsed) => return (parsed.statements, Vec::new()),
            Err(err) => err,
        };

        let chunks: Vec<&str> = self
            .body
            .split(';')
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .collect();
        if chunks.len() < 2 {
            return (Vec::new(), vec![self.parse_error(whole_error)]);
        }

        let mut statements = Vec::new();
        let mut errors = Vec::new();
        for chunk in chunks {
            match parser.parse(chunk, None) {
                Ok(parsed) => statements.extend(parsed.statements),
                Err(err) => {
                    tracing::debug!(procedure = %self.name, %err, "skipping procedure chunk");
                    errors.push(self.parse_error(err));
                }
            }
        }

        (statements, errors)
    }

    fn parse_error(&self, source: ParseError) -> ProcedureError {
        ProcedureError::Parse {
            procedure: self.name.clone(),
            source,
        }
    }
}

impl std::fmt::Display for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: '{}'", self.name, self.body)
    }
}

/// `$name$`, the node name of a procedure called `name`
pub(crate) fn graph_name(procedure: &str) -> String {
    format!("${}$", procedure)
}

/// Find every dollar-quoted procedure or function in a SQL text
pub fn extract_procedures(sql: &str) -> Vec<Procedure> {
    PROCEDURE_PATTERN
        .captures_iter(sql)
        .filter_map(|captures| {
            let name = captures.get(1)?.as_str();
            let body = captures.get(2)?.as_str();
            Some(Procedure::new(name, block_body(body)))
        })
        .collect()
}

/// Text between the first `BEGIN` and the last `END`, when present
fn block_body(body: &str) -> &str {
    let Some(begin) = BEGIN_KEYWORD.find(body) else {
        return body.trim();
    };

    let inner = &body[begin.end()..];
    match END_KEYWORD.find_iter(inner).last() {
        Some(end) => inner[..end.start()].trim(),
        None => inner.trim(),
    }
}
