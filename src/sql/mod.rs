//! SQL processing module
//!
//! This module provides:
//! - `parser`: SQL lexer and parser
//! - `types`: SQL data types and value conversion
//! - `schema`: Table and column schema definitions
//! - `eval`: Expression evaluation, operators and functions
//! - `plan`: Execution plan generation
//! - `executor`: Query and mutation execution
//! - `engine`: Engine, transaction and session

pub mod parser;
pub mod types;
pub mod schema;
pub mod eval;
pub mod plan;
pub mod executor;
pub mod engine;
