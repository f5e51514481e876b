//! pgmem - an embeddable, in-memory, PostgreSQL-dialect SQL engine
//!
//! SQL text is parsed, planned and executed against a transactional row
//! store held entirely in memory:
//! - SQL parsing (lexer, parser, AST)
//! - Query planning and execution, including joins, grouping and subqueries
//! - Transactions with statement-level atomicity and snapshot rollback
//! - Row triggers and host-registered scalar functions
//!
//! ```ignore
//! let engine = LocalEngine::new(Config::default())?;
//! let mut session = engine.session()?;
//! session.execute("CREATE TABLE t (id SERIAL PRIMARY KEY, name TEXT)")?;
//! session.execute("INSERT INTO t (name) VALUES ('a')")?;
//! let result = session.execute("SELECT id, name FROM t")?;
//! ```

pub mod config;
pub mod error;
pub mod sql;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use sql::{
    engine::{Engine, LocalEngine, Session},
    executor::{ResultColumn, ResultSet, StatementKind},
    types::{DataType, Value},
};
pub use storage::{IsolationLevel, Trigger, TriggerDefinition, TriggerOperation, TriggerTiming};
