use tracing::{debug, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    sql::{
        eval::FunctionRegistry,
        executor::{Context, ResultSet},
        parser::{ast::Statement, parse},
        plan::Plan,
        schema::Table,
        types::Tuple,
    },
    storage::{IsolationLevel, Row, RowId},
};

mod local;

pub use local::LocalEngine;

/// SQL engine trait
pub trait Engine: Clone {
    type Transaction: Transaction;

    /// Begins an explicit transaction
    fn begin(&self, isolation: IsolationLevel) -> Result<Self::Transaction>;

    /// Begins an autocommit transaction for a single statement
    fn begin_implicit(&self, isolation: IsolationLevel) -> Result<Self::Transaction>;

    fn functions(&self) -> &FunctionRegistry;

    fn config(&self) -> &Config;

    fn session(&self) -> Result<Session<Self>> {
        Ok(Session {
            engine: self.clone(),
            txn: None,
        })
    }
}

/// SQL transaction trait (DDL and DML operations)
///
/// Row changes made through a transaction are visible to its later
/// statements at once. A failing statement is reversed by
/// `abort_statement`; the whole transaction by `rollback`.
pub trait Transaction: 'static {
    fn version(&self) -> u64;
    fn isolation(&self) -> IsolationLevel;

    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Marks the start of a statement
    fn begin_statement(&self) -> Result<()>;
    /// Reverses every row change since `begin_statement`
    fn abort_statement(&self) -> Result<()>;

    // DDL operations
    fn create_schema(&self, name: &str) -> Result<()>;
    fn drop_schema(&self, name: &str) -> Result<()>;
    fn has_schema(&self, name: &str) -> Result<bool>;
    fn create_table(&self, table: Table) -> Result<()>;
    fn drop_table(&self, schema: &str, name: &str) -> Result<()>;
    fn get_table(&self, schema: &str, name: &str) -> Result<Option<Table>>;

    /// Returns table info, returns error if table doesn't exist
    fn must_get_table(&self, schema: &str, name: &str) -> Result<Table> {
        self.get_table(schema, name)?.ok_or_else(|| {
            Error::Execution(format!("relation \"{}\" does not exist", name))
        })
    }

    // DML operations
    /// Full scan in row id order
    fn scan_table(&self, schema: &str, table: &str) -> Result<Vec<Row>>;
    /// Validates and inserts rows, returning them as stored
    fn insert_rows(&self, schema: &str, table: &str, rows: Vec<Tuple>) -> Result<Vec<Row>>;
    /// Replaces the values of a row, keeping its id
    fn update_row(&self, schema: &str, table: &str, id: RowId, values: Tuple) -> Result<Row>;
    fn delete_row(&self, schema: &str, table: &str, id: RowId) -> Result<()>;
    fn next_sequence_value(&self, schema: &str, table: &str, column: &str) -> Result<i64>;
}

/// SQL session for executing statements
///
/// Outside BEGIN ... COMMIT every statement runs in its own transaction.
/// Inside one, a failing statement is undone on its own and the transaction
/// stays usable.
pub struct Session<E: Engine> {
    engine: E,
    txn: Option<E::Transaction>,
}

impl<E: Engine> Session<E> {
    /// Executes SQL text, returning the result of its last statement
    pub fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        self.execute_batch(sql)?
            .pop()
            .ok_or_else(|| Error::Execution("empty query".into()))
    }

    /// Executes every statement of the SQL text in order, stopping at the
    /// first failure
    pub fn execute_batch(&mut self, sql: &str) -> Result<Vec<ResultSet>> {
        parse(sql)?
            .into_iter()
            .map(|statement| self.execute_statement(statement))
            .collect()
    }

    /// Executes one parsed statement
    pub fn execute_statement(&mut self, statement: Statement) -> Result<ResultSet> {
        match statement {
            Statement::Begin { isolation } => {
                if self.txn.is_some() {
                    return Err(Error::TransactionState(
                        "there is already a transaction in progress".into(),
                    ));
                }
                let isolation = isolation.unwrap_or(self.engine.config().default_isolation);
                let txn = self.engine.begin(isolation)?;
                let result = ResultSet::Begin {
                    version: txn.version(),
                    isolation: txn.isolation(),
                };
                self.txn = Some(txn);
                Ok(result)
            }
            Statement::Commit => {
                let txn = self.txn.take().ok_or_else(no_transaction)?;
                let version = txn.version();
                txn.commit()?;
                Ok(ResultSet::Commit { version })
            }
            Statement::Rollback => {
                let txn = self.txn.take().ok_or_else(no_transaction)?;
                let version = txn.version();
                txn.rollback()?;
                Ok(ResultSet::Rollback { version })
            }
            statement => match &self.txn {
                Some(txn) => {
                    txn.begin_statement()?;
                    Self::run(&self.engine, txn, statement).or_else(|err| {
                        txn.abort_statement()?;
                        Err(err)
                    })
                }
                None => {
                    let txn = self
                        .engine
                        .begin_implicit(self.engine.config().default_isolation)?;
                    txn.begin_statement()?;
                    match Self::run(&self.engine, &txn, statement) {
                        Ok(result) => {
                            txn.commit()?;
                            Ok(result)
                        }
                        Err(err) => {
                            txn.abort_statement()?;
                            txn.rollback()?;
                            Err(err)
                        }
                    }
                }
            },
        }
    }

    /// Whether an explicit transaction is open
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn run(engine: &E, txn: &E::Transaction, statement: Statement) -> Result<ResultSet> {
        let ctx = Context::new(txn, engine.functions(), &engine.config().default_schema);
        debug!(txn = txn.version(), ?statement, "execute statement");
        Plan::build(statement, &ctx)?.execute(&ctx)
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(err) = txn.rollback() {
                warn!(txn = txn.version(), %err, "rollback of abandoned transaction failed");
            }
        }
    }
}

fn no_transaction() -> Error {
    Error::TransactionState("there is no transaction in progress".into())
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::{
        config::Config,
        error::{Error, Result},
        sql::{engine::LocalEngine, executor::ResultSet, types::Value},
    };

    #[test]
    fn test_transaction_control() -> Result<()> {
        let engine = LocalEngine::new(Config::default())?;
        let mut session = engine.session()?;
        assert_eq!(
            session.execute("COMMIT"),
            Err(Error::TransactionState(
                "there is no transaction in progress".into()
            ))
        );
        assert!(matches!(session.execute("BEGIN")?, ResultSet::Begin { .. }));
        assert!(session.in_transaction());
        assert_eq!(
            session.execute("BEGIN"),
            Err(Error::TransactionState(
                "there is already a transaction in progress".into()
            ))
        );
        assert!(matches!(session.execute("END")?, ResultSet::Commit { .. }));
        assert!(!session.in_transaction());
        Ok(())
    }

    #[test]
    fn test_failed_statement_keeps_transaction() -> Result<()> {
        let engine = LocalEngine::new(Config::default())?;
        let mut session = engine.session()?;
        session.execute("CREATE TABLE t (id INT PRIMARY KEY)")?;
        session.execute("BEGIN; INSERT INTO t VALUES (1)")?;
        // The second row collides; the first of this statement is undone
        assert!(matches!(
            session.execute("INSERT INTO t VALUES (2), (1)"),
            Err(Error::Validation(_))
        ));
        session.execute("INSERT INTO t VALUES (3)")?;
        session.execute("COMMIT")?;
        let result = session.execute("SELECT id FROM t ORDER BY id")?;
        assert_eq!(
            result.rows(),
            &[vec![Value::Integer(1)], vec![Value::Integer(3)]]
        );
        Ok(())
    }

    #[test]
    fn test_dropped_session_rolls_back() -> Result<()> {
        let engine = LocalEngine::new(Config::default())?;
        engine.session()?.execute("CREATE TABLE t (a INT)")?;
        {
            let mut session = engine.session()?;
            session.execute("BEGIN; INSERT INTO t VALUES (1)")?;
        }
        let result = engine.session()?.execute("SELECT count(*) FROM t")?;
        assert_eq!(result.rows(), &[vec![Value::BigInt(0)]]);
        Ok(())
    }

    #[test]
    fn test_batch_results() -> Result<()> {
        let engine = LocalEngine::new(Config::default())?;
        let mut session = engine.session()?;
        let results = session.execute_batch(
            "CREATE TABLE t (a INT); INSERT INTO t VALUES (1), (2); UPDATE t SET a = a + 1; SELECT a FROM t;",
        )?;
        let affected: Vec<usize> = results.iter().map(|r| r.affected_rows()).collect();
        assert_eq!(affected, vec![0, 2, 2, 2]);
        assert_eq!(session.execute(""), Err(Error::Execution("empty query".into())));
        Ok(())
    }
}
