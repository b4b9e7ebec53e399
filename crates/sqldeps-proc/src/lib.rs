//! Stored procedure lineage
//!
//! This crate handles:
//! - Extracting `PROCEDURE`/`FUNCTION` bodies from DDL text
//! - Building each body in isolation with a fresh placeholder allocator
//! - Finding buffer tables: tables written by one procedure and read by another
//! - Folding buffer tables into a procedure-level dependency map

pub mod procedure;
pub mod buffer;

pub use procedure::{Procedure, ProcedureError, extract_procedures};
pub use buffer::{BufferAnalyzer, BufferTable, build_dependencies, find_buffer_tables};
