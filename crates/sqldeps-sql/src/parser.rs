//! SQL parsing using datafusion-sqlparser-rs
//!
//! Tries each configured dialect in order and keeps the first that parses.

use sqlparser::ast::Statement;
use sqlparser::dialect::{
    AnsiDialect, BigQueryDialect, Dialect, GenericDialect, MsSqlDialect, MySqlDialect,
    PostgreSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;
use sqldeps_core::{Diagnostic, DiagnosticCode, DialectConfig, Location, Severity};
use std::path::{Path, PathBuf};

/// Build the sqlparser dialect for a configured dialect
pub fn dialect_for(config: DialectConfig) -> Box<dyn Dialect> {
    match config {
        DialectConfig::Postgres => Box::new(PostgreSqlDialect {}),
        DialectConfig::Generic => Box::new(GenericDialect {}),
        DialectConfig::Ansi => Box::new(AnsiDialect {}),
        DialectConfig::BigQuery => Box::new(BigQueryDialect {}),
        DialectConfig::Snowflake => Box::new(SnowflakeDialect {}),
        DialectConfig::MySql => Box::new(MySqlDialect {}),
        DialectConfig::MsSql => Box::new(MsSqlDialect {}),
    }
}

/// SQL parser with a dialect fallback chain
#[derive(Debug, Clone)]
pub struct SqlParser {
    dialects: Vec<DialectConfig>,
}

impl SqlParser {
    /// Create a parser with the default chain (Postgres, then generic)
    pub fn new() -> Self {
        Self::with_dialects(DialectConfig::default_chain())
    }

    /// Create a parser that tries the given dialects in order
    ///
    /// An empty list falls back to the default chain.
    pub fn with_dialects(dialects: Vec<DialectConfig>) -> Self {
        if dialects.is_empty() {
            return Self::new();
        }
        Self { dialects }
    }

    /// Create a parser for exactly one dialect
    pub fn single(dialect: DialectConfig) -> Self {
        Self {
            dialects: vec![dialect],
        }
    }

    pub fn dialects(&self) -> &[DialectConfig] {
        &self.dialects
    }

    /// Parse SQL string into AST
    ///
    /// Returns the statements of the first dialect that accepts the text.
    pub fn parse(&self, sql: &str, file_path: Option<&Path>) -> Result<ParsedSql, ParseError> {
        let file_path = file_path.map(Path::to_path_buf);

        if sql.trim().is_empty() {
            return Err(ParseError::InvalidInput { file_path });
        }

        let mut last_error = None;
        for &dialect in &self.dialects {
            match Parser::parse_sql(dialect_for(dialect).as_ref(), sql) {
                Ok(statements) => {
                    tracing::debug!(%dialect, statements = statements.len(), "parsed SQL");
                    return Ok(ParsedSql {
                        sql: sql.to_string(),
                        statements,
                        dialect,
                        file_path,
                    });
                }
                Err(e) => {
                    tracing::debug!(%dialect, error = %e, "dialect rejected SQL");
                    last_error = Some((dialect, e.to_string()));
                }
            }
        }

        let (dialect, message) = last_error
            .unwrap_or_else(|| (DialectConfig::Generic, "no dialect configured".to_string()));

        Err(ParseError::Syntax {
            message,
            dialect,
            file_path,
        })
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,

    /// Dialect that accepted the text
    pub dialect: DialectConfig,

    /// Source file path (if parsed from file)
    pub file_path: Option<PathBuf>,
}

impl ParsedSql {
    pub fn first_statement(&self) -> Option<&Statement> {
        self.statements.first()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}

/// SQL parsing error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid input: Not a valid SQL string")]
    InvalidInput { file_path: Option<PathBuf> },

    #[error("Error parsing SQL: {message}")]
    Syntax {
        /// Message of the last dialect tried
        message: String,
        dialect: DialectConfig,
        file_path: Option<PathBuf>,
    },
}

impl ParseError {
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::InvalidInput { file_path } | Self::Syntax { file_path, .. } => file_path.as_deref(),
        }
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        let code = match self {
            Self::InvalidInput { .. } => DiagnosticCode::InvalidInput,
            Self::Syntax { .. } => DiagnosticCode::SqlParseError,
        };

        let diag = Diagnostic::new(code, Severity::Error, self.to_string());

        match self.file_path() {
            Some(path) => diag.with_location(Location::new(path.display().to_string())),
            None => diag,
        }
    }
}
