//! SQL parsing and dependency extraction
//!
//! This crate handles:
//! - Parsing SQL using datafusion-sqlparser-rs with a dialect fallback chain
//! - Resolving table factors and nested queries to entity names
//! - Detecting recursive and mutually recursive CTEs
//! - Building the target-indexed dependency map of a batch
//! - Column-level lineage for statement edges

pub mod parser;
pub mod resolver;
pub mod cte;
pub mod builder;
pub mod columns;
pub mod session;

pub use parser::{SqlParser, ParsedSql, ParseError, dialect_for};
pub use resolver::{ReferenceResolver, ResolvedName, ResolveError, MAX_REFERENCE_HOPS, entity_name};
pub use cte::{CteRegistry, CteDefinition};
pub use builder::{DependencyBuilder, BuildOutput, StatementEdges};
pub use columns::{ColumnLineage, ColumnError, extract_columns, columns};
pub use session::{Analysis, ColumnEntry, IdAllocator, LineageSession, extract_dependencies};
