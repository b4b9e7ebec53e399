//! sqldeps Core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod graph;
pub mod dag;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use graph::{Edge, OperationKind, DependencyMap, EdgeFilter, EntityName, is_placeholder, unaliased};
pub use dag::DependencyGraph;
pub use report::{Report, ReportVersion, ReportSummary};
pub use config::{Config, ConfigError, CounterScope, DialectConfig, FilterConfig, ScanConfig, SeverityThreshold};
