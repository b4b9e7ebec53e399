//! Configuration schema (sqldeps.toml)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::diagnostic::{DiagnosticCode, Severity};
use crate::graph::OperationKind;

/// SQL dialect configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// PostgreSQL SQL dialect
    Postgres,

    /// Permissive generic dialect
    Generic,

    /// Generic ANSI SQL
    Ansi,

    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,

    /// MySQL SQL dialect
    MySql,

    /// Microsoft SQL Server dialect
    MsSql,
}

impl DialectConfig {
    /// Default fallback chain: strict Postgres first, then the generic dialect
    pub fn default_chain() -> Vec<DialectConfig> {
        vec![Self::Postgres, Self::Generic]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Generic => "generic",
            Self::Ansi => "ansi",
            Self::BigQuery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::MySql => "mysql",
            Self::MsSql => "mssql",
        }
    }
}

impl std::fmt::Display for DialectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How placeholder counters (`result N`, `input N`, `unknown N`) are scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterScope {
    /// Counters restart at 0 for every analysed unit
    #[default]
    Isolated,

    /// Counters keep growing across every unit of a session
    Accumulating,
}

/// Severity threshold overrides for specific diagnostic codes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of diagnostic code to severity override
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl SeverityThreshold {
    /// Get severity for a diagnostic code, or default
    pub fn get_severity(&self, code: DiagnosticCode, default: Severity) -> Severity {
        self.overrides
            .get(code.as_str())
            .copied()
            .unwrap_or(default)
    }

    /// Set severity override for a code
    pub fn set_override(&mut self, code: DiagnosticCode, severity: Severity) {
        self.overrides.insert(code.as_str().to_string(), severity);
    }
}

/// Edge filtering applied before output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Keep only edges with these operations (empty keeps everything)
    #[serde(default)]
    pub operations: Vec<OperationKind>,

    /// Drop edges touching `result N` / `input N` / `unknown N` placeholders
    #[serde(default)]
    pub hide_placeholders: bool,
}

/// Directory scanning rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// File extensions (without dot) that are read as SQL
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["sql".to_string(), "ddl".to_string()]
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

impl ScanConfig {
    /// Check whether a path has one of the configured extensions
    pub fn accepts(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Dialects tried in order when parsing
    #[serde(default = "DialectConfig::default_chain")]
    pub dialects: Vec<DialectConfig>,

    /// Placeholder counter scoping
    #[serde(default)]
    pub counter_scope: CounterScope,

    /// Attach column lineage to statement edges
    #[serde(default)]
    pub column_lineage: bool,

    /// Output filtering
    #[serde(default)]
    pub filter: FilterConfig,

    /// Directory scanning
    #[serde(default)]
    pub scan: ScanConfig,

    /// Severity thresholds
    #[serde(default)]
    pub severity: SeverityThreshold,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialects: DialectConfig::default_chain(),
            counter_scope: CounterScope::default(),
            column_lineage: false,
            filter: FilterConfig::default(),
            scan: ScanConfig::default(),
            severity: SeverityThreshold::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config.dialects.is_empty() {
            return Err(ConfigError::ParseError(
                "at least one dialect must be configured".to_string(),
            ));
        }

        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialects, vec![DialectConfig::Postgres, DialectConfig::Generic]);
        assert_eq!(config.counter_scope, CounterScope::Isolated);
        assert!(!config.column_lineage);
        assert!(!config.filter.hide_placeholders);
    }

    #[test]
    fn severity_override() {
        let mut threshold = SeverityThreshold::default();
        threshold.set_override(DiagnosticCode::UnresolvedReference, Severity::Error);

        assert_eq!(
            threshold.get_severity(DiagnosticCode::UnresolvedReference, Severity::Warn),
            Severity::Error
        );
        assert_eq!(
            threshold.get_severity(DiagnosticCode::UnsupportedStatement, Severity::Info),
            Severity::Info
        );
    }

    #[test]
    fn parse_full_config() {
        let config = Config::from_toml(
            r#"
            dialects = ["mssql", "generic"]
            counter_scope = "accumulating"
            column_lineage = true

            [filter]
            operations = ["insert", "buffer_write"]
            hide_placeholders = true

            [scan]
            extensions = ["sql"]

            [severity.overrides]
            UNRESOLVED_REFERENCE = "error"
            "#,
        )
        .unwrap();

        assert_eq!(config.dialects, vec![DialectConfig::MsSql, DialectConfig::Generic]);
        assert_eq!(config.counter_scope, CounterScope::Accumulating);
        assert!(config.column_lineage);
        assert_eq!(
            config.filter.operations,
            vec![OperationKind::Insert, OperationKind::BufferWrite]
        );
        assert!(config.filter.hide_placeholders);
        assert_eq!(config.scan.extensions, vec!["sql".to_string()]);
        assert_eq!(
            config.severity.get_severity(DiagnosticCode::UnresolvedReference, Severity::Warn),
            Severity::Error
        );
    }

    #[test]
    fn empty_dialect_list_rejected() {
        let err = Config::from_toml("dialects = []").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config.dialects, parsed.dialects);
        assert_eq!(config.scan, parsed.scan);
    }

    #[test]
    fn scan_extension_matching() {
        let scan = ScanConfig::default();
        assert!(scan.accepts(std::path::Path::new("etl/load.sql")));
        assert!(scan.accepts(std::path::Path::new("procs/LOAD.DDL")));
        assert!(!scan.accepts(std::path::Path::new("README.md")));
        assert!(!scan.accepts(std::path::Path::new("Makefile")));
    }
}
