use std::sync::{Arc, Mutex};

use crate::{
    config::Config,
    error::Result,
    sql::{
        eval::FunctionRegistry,
        schema::Table,
        types::{Tuple, Value},
    },
    storage::{
        self, IsolationLevel, MemoryStorage, Row, RowId, Trigger, TriggerDefinition,
        TriggerRegistry, TransactionManager,
    },
};

use super::{Engine, Transaction};

/// SQL engine over the in-memory store
///
/// Clones share the same store, triggers and functions.
#[derive(Clone)]
pub struct LocalEngine {
    storage: Arc<Mutex<MemoryStorage>>,
    triggers: Arc<TriggerRegistry>,
    manager: TransactionManager,
    functions: Arc<FunctionRegistry>,
    config: Arc<Config>,
}

impl LocalEngine {
    /// Creates an empty engine holding only the default schema
    pub fn new(config: Config) -> Result<Self> {
        let mut storage = MemoryStorage::new();
        storage.create_schema(&config.default_schema)?;
        let storage = Arc::new(Mutex::new(storage));
        let triggers = Arc::new(TriggerRegistry::new());
        Ok(Self {
            manager: TransactionManager::new(storage.clone(), triggers.clone()),
            storage,
            triggers,
            functions: Arc::new(FunctionRegistry::new()),
            config: Arc::new(config),
        })
    }

    /// Makes a function callable from SQL under a case-insensitive name,
    /// replacing any function of that name
    pub fn register_function<F>(&self, name: &str, function: F) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.register(name, Arc::new(function))
    }

    pub fn register_trigger(&self, definition: TriggerDefinition, trigger: Box<dyn Trigger>) -> Result<()> {
        self.triggers.register(definition, trigger)
    }

    pub fn unregister_trigger(&self, schema: &str, table: &str, name: &str) -> Result<()> {
        self.triggers.unregister(schema, table, name)
    }

    /// The underlying store, for catalog introspection
    pub fn storage(&self) -> Arc<Mutex<MemoryStorage>> {
        self.storage.clone()
    }

    /// Keys generated by the last INSERT into a table
    pub fn last_generated_keys(&self, schema: &str, table: &str) -> Result<Vec<Tuple>> {
        Ok(self
            .storage
            .lock()?
            .must_get_table(schema, table)?
            .last_generated_keys()
            .to_vec())
    }
}

impl Engine for LocalEngine {
    type Transaction = storage::Transaction;

    fn begin(&self, isolation: IsolationLevel) -> Result<Self::Transaction> {
        self.manager.begin(isolation)
    }

    fn begin_implicit(&self, isolation: IsolationLevel) -> Result<Self::Transaction> {
        self.manager.begin_implicit(isolation)
    }

    fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

impl Transaction for storage::Transaction {
    fn version(&self) -> u64 {
        storage::Transaction::version(self)
    }

    fn isolation(&self) -> IsolationLevel {
        storage::Transaction::isolation(self)
    }

    fn commit(&self) -> Result<()> {
        storage::Transaction::commit(self)
    }

    fn rollback(&self) -> Result<()> {
        storage::Transaction::rollback(self)
    }

    fn begin_statement(&self) -> Result<()> {
        storage::Transaction::begin_statement(self)
    }

    fn abort_statement(&self) -> Result<()> {
        storage::Transaction::abort_statement(self)
    }

    fn create_schema(&self, name: &str) -> Result<()> {
        storage::Transaction::create_schema(self, name)
    }

    fn drop_schema(&self, name: &str) -> Result<()> {
        storage::Transaction::drop_schema(self, name)
    }

    fn has_schema(&self, name: &str) -> Result<bool> {
        storage::Transaction::has_schema(self, name)
    }

    fn create_table(&self, table: Table) -> Result<()> {
        storage::Transaction::create_table(self, table)
    }

    fn drop_table(&self, schema: &str, name: &str) -> Result<()> {
        storage::Transaction::drop_table(self, schema, name)
    }

    fn get_table(&self, schema: &str, name: &str) -> Result<Option<Table>> {
        storage::Transaction::get_table(self, schema, name)
    }

    fn scan_table(&self, schema: &str, table: &str) -> Result<Vec<Row>> {
        self.scan(schema, table)
    }

    fn insert_rows(&self, schema: &str, table: &str, rows: Vec<Tuple>) -> Result<Vec<Row>> {
        self.insert(schema, table, rows)
    }

    fn update_row(&self, schema: &str, table: &str, id: RowId, values: Tuple) -> Result<Row> {
        self.update(schema, table, id, values)
    }

    fn delete_row(&self, schema: &str, table: &str, id: RowId) -> Result<()> {
        self.delete(schema, table, id)
    }

    fn next_sequence_value(&self, schema: &str, table: &str, column: &str) -> Result<i64> {
        storage::Transaction::next_sequence_value(self, schema, table, column)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::LocalEngine;
    use crate::{
        config::Config,
        error::{Error, Result},
        sql::{
            engine::{Engine, Session},
            executor::{ResultColumn, ResultSet, StatementKind},
            types::{DataType, Value},
        },
        storage::{
            MemoryStorage, Row, Trigger, TriggerDefinition, TriggerOperation, TriggerTiming,
        },
    };

    fn setup(sql: &str) -> Result<(LocalEngine, Session<LocalEngine>)> {
        // RUST_LOG=pgmem=trace shows statement and trigger traces
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let engine = LocalEngine::new(Config::default())?;
        let mut session = engine.session()?;
        session.execute_batch(sql)?;
        Ok((engine, session))
    }

    fn rows(session: &mut Session<LocalEngine>, sql: &str) -> Result<Vec<Vec<Value>>> {
        Ok(session.execute(sql)?.rows().to_vec())
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_insert_round_trip() -> Result<()> {
        let (_, mut session) = setup("CREATE TABLE t (a INT, b TEXT)")?;
        let result = session.execute("INSERT INTO t VALUES (42, 'a')")?;
        assert_eq!(result.kind(), StatementKind::Insert);
        assert_eq!(result.affected_rows(), 1);

        let result = session.execute("SELECT * FROM t")?;
        assert_eq!(result.kind(), StatementKind::Select);
        assert_eq!(
            result.columns(),
            &[
                ResultColumn::new(Some("t"), "a", Some(DataType::Integer)),
                ResultColumn::new(Some("t"), "b", Some(DataType::Text)),
            ]
        );
        assert_eq!(result.rows(), &[vec![Value::Integer(42), text("a")]]);
        Ok(())
    }

    #[test]
    fn test_values_are_coerced() -> Result<()> {
        let (_, mut session) =
            setup("CREATE TABLE t (d DATE, n NUMERIC(6, 2), flag BOOLEAN DEFAULT true)")?;
        session.execute("INSERT INTO t (d, n) VALUES ('2024-02-29', '12.5')")?;
        let result = rows(&mut session, "SELECT d::text, n::text, flag FROM t")?;
        assert_eq!(
            result,
            vec![vec![text("2024-02-29"), text("12.50"), Value::Boolean(true)]]
        );
        assert!(matches!(
            session.execute("INSERT INTO t (d) VALUES ('not a date')"),
            Err(Error::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_identity_update_changes_nothing() -> Result<()> {
        let (engine, mut session) = setup(
            "CREATE TABLE t (id INT PRIMARY KEY, name TEXT, score INT);
             INSERT INTO t VALUES (1, 'a', 10), (2, 'b', NULL);",
        )?;
        let before: Vec<Row> = engine
            .storage()
            .lock()?
            .must_get_table("public", "t")?
            .all_rows();
        let result = session.execute("UPDATE t SET name = name")?;
        assert_eq!(result.affected_rows(), 2);
        let after: Vec<Row> = engine
            .storage()
            .lock()?
            .must_get_table("public", "t")?
            .all_rows();
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn test_row_value_out_of_range() -> Result<()> {
        let (engine, mut session) = setup("CREATE TABLE t (a INT, b TEXT)")?;
        session.execute("INSERT INTO t VALUES (1, 'x')")?;
        let rows = engine
            .storage()
            .lock()?
            .must_get_table("public", "t")?
            .all_rows();
        assert_eq!(rows[0].get_value(1)?, &text("x"));
        assert!(rows[0].get_value(2).is_err());
        Ok(())
    }

    #[test]
    fn test_rollback_restores_every_table() -> Result<()> {
        let (engine, mut session) = setup(
            "CREATE TABLE a (x INT); CREATE TABLE b (y TEXT);
             INSERT INTO a VALUES (1), (2); INSERT INTO b VALUES ('keep');",
        )?;
        let snapshot = |engine: &LocalEngine| -> Result<(Vec<Row>, Vec<Row>)> {
            let storage = engine.storage();
            let storage = storage.lock()?;
            Ok((
                storage.must_get_table("public", "a")?.all_rows(),
                storage.must_get_table("public", "b")?.all_rows(),
            ))
        };
        let before = snapshot(&engine)?;

        session.execute_batch(
            "BEGIN;
             INSERT INTO a VALUES (3);
             DELETE FROM a WHERE x = 1;
             UPDATE b SET y = 'changed';
             INSERT INTO b VALUES ('new');",
        )?;
        assert_eq!(rows(&mut session, "SELECT count(*) FROM a")?, vec![vec![Value::BigInt(2)]]);
        session.execute("ROLLBACK")?;

        assert_eq!(snapshot(&engine)?, before);
        // Row ids continue from where they were before BEGIN
        session.execute("INSERT INTO a VALUES (4)")?;
        let (a, _) = snapshot(&engine)?;
        assert_eq!(a.last().map(|r| r.id), Some(3));
        Ok(())
    }

    #[test]
    fn test_joins() -> Result<()> {
        let (_, mut session) = setup(
            "CREATE TABLE a (x INT); CREATE TABLE b (x INT, label TEXT);
             INSERT INTO a VALUES (1), (2); INSERT INTO b VALUES (1, 'one');",
        )?;
        assert_eq!(
            rows(&mut session, "SELECT a.x, b.label FROM a LEFT JOIN b ON a.x = b.x ORDER BY a.x")?,
            vec![
                vec![Value::Integer(1), text("one")],
                vec![Value::Integer(2), Value::Null],
            ]
        );
        assert_eq!(
            rows(&mut session, "SELECT * FROM a INNER JOIN b ON a.x = b.x")?,
            vec![vec![Value::Integer(1), Value::Integer(1), text("one")]]
        );
        assert_eq!(
            rows(&mut session, "SELECT * FROM a RIGHT JOIN b USING (x)")?,
            vec![vec![Value::Integer(1), text("one")]]
        );
        assert_eq!(
            rows(&mut session, "SELECT x, label FROM b FULL JOIN a USING (x) ORDER BY x")?,
            vec![
                vec![Value::Integer(1), text("one")],
                vec![Value::Integer(2), Value::Null],
            ]
        );
        assert_eq!(
            rows(&mut session, "SELECT count(*) FROM a, b")?,
            vec![vec![Value::BigInt(2)]]
        );
        assert_eq!(
            rows(&mut session, "SELECT * FROM a NATURAL JOIN b")?,
            vec![vec![Value::Integer(1), text("one")]]
        );
        Ok(())
    }

    #[test]
    fn test_precedence() -> Result<()> {
        let (_, mut session) = setup("")?;
        // (NOT false) AND false
        assert_eq!(
            rows(&mut session, "SELECT NOT false AND false")?,
            vec![vec![Value::Boolean(false)]]
        );
        // (5 BETWEEN 1 AND 2) OR true
        assert_eq!(
            rows(&mut session, "SELECT 5 BETWEEN 1 AND 2 OR true")?,
            vec![vec![Value::Boolean(true)]]
        );
        assert_eq!(
            rows(&mut session, "SELECT 2 + 3 * 4, (2 + 3) * 4, -2 * 3")?,
            vec![vec![Value::Integer(14), Value::Integer(20), Value::Integer(-6)]]
        );
        Ok(())
    }

    #[test]
    fn test_null_in_where() -> Result<()> {
        let (_, mut session) = setup("CREATE TABLE t (a INT); INSERT INTO t VALUES (1), (NULL);")?;
        assert!(rows(&mut session, "SELECT a FROM t WHERE NULL = NULL")?.is_empty());
        assert_eq!(rows(&mut session, "SELECT a FROM t WHERE NULL IS NULL")?.len(), 2);
        assert_eq!(
            rows(&mut session, "SELECT a FROM t WHERE a IS NULL")?,
            vec![vec![Value::Null]]
        );
        assert_eq!(
            rows(&mut session, "SELECT a FROM t ORDER BY a DESC")?,
            vec![vec![Value::Null], vec![Value::Integer(1)]]
        );
        assert_eq!(
            rows(&mut session, "SELECT a FROM t ORDER BY a NULLS FIRST")?,
            vec![vec![Value::Null], vec![Value::Integer(1)]]
        );
        Ok(())
    }

    #[test]
    fn test_invalid_type_registers_nothing() -> Result<()> {
        let (engine, mut session) = setup("")?;
        assert!(matches!(
            session.execute("CREATE TABLE bad (a INT, b NOTATYPE)"),
            Err(Error::Parse { .. })
        ));
        assert!(engine.storage().lock()?.get_table("public", "bad").is_none());
        assert_eq!(
            session.execute("SELECT * FROM bad"),
            Err(Error::Execution("relation \"bad\" does not exist".into()))
        );
        Ok(())
    }

    #[test]
    fn test_statement_atomicity() -> Result<()> {
        let (_, mut session) = setup("CREATE TABLE t (a INT NOT NULL)")?;
        assert!(matches!(
            session.execute("INSERT INTO t VALUES (1), (NULL)"),
            Err(Error::Validation(_))
        ));
        assert_eq!(rows(&mut session, "SELECT count(*) FROM t")?, vec![vec![Value::BigInt(0)]]);
        Ok(())
    }

    /// Records each firing with the number of rows visible at that moment
    struct RowCounter {
        label: &'static str,
        storage: Arc<Mutex<MemoryStorage>>,
        events: Arc<Mutex<Vec<(&'static str, usize)>>>,
        fail: bool,
    }

    impl Trigger for RowCounter {
        fn fire(&mut self, _old: Option<&Row>, _new: Option<&Row>) -> Result<()> {
            if self.fail {
                return Err(Error::Trigger(format!("{} refused the row", self.label)));
            }
            let visible = self
                .storage
                .lock()?
                .must_get_table("public", "t")?
                .row_count();
            self.events.lock()?.push((self.label, visible));
            Ok(())
        }
    }

    fn definition(name: &str, timing: TriggerTiming, operation: TriggerOperation) -> TriggerDefinition {
        TriggerDefinition {
            schema: "public".into(),
            name: name.into(),
            table: "t".into(),
            timing,
            operation,
        }
    }

    type Firings = Arc<Mutex<Vec<(Option<Row>, Option<Row>)>>>;

    /// Records the old and new row of each firing, failing on the
    /// `fail_at`-th one
    struct Recorder {
        seen: Firings,
        fail_at: Option<usize>,
    }

    impl Recorder {
        fn boxed(seen: &Firings, fail_at: Option<usize>) -> Box<Self> {
            Box::new(Self {
                seen: seen.clone(),
                fail_at,
            })
        }
    }

    impl Trigger for Recorder {
        fn fire(&mut self, old: Option<&Row>, new: Option<&Row>) -> Result<()> {
            let mut seen = self.seen.lock()?;
            seen.push((old.cloned(), new.cloned()));
            if Some(seen.len()) == self.fail_at {
                return Err(Error::Trigger(format!("rejected firing {}", seen.len())));
            }
            Ok(())
        }
    }

    #[test]
    fn test_trigger_ordering() -> Result<()> {
        let (engine, mut session) = setup("CREATE TABLE t (a INT)")?;
        let events = Arc::new(Mutex::new(Vec::new()));
        for (name, timing) in [("before", TriggerTiming::Before), ("after", TriggerTiming::After)] {
            engine.register_trigger(
                definition(name, timing, TriggerOperation::Insert),
                Box::new(RowCounter {
                    label: name,
                    storage: engine.storage(),
                    events: events.clone(),
                    fail: false,
                }),
            )?;
        }
        session.execute("INSERT INTO t VALUES (1), (2)")?;
        assert_eq!(
            *events.lock()?,
            vec![("before", 0), ("after", 1), ("before", 1), ("after", 2)]
        );
        Ok(())
    }

    #[test]
    fn test_failing_trigger_aborts_statement() -> Result<()> {
        let (engine, mut session) = setup("CREATE TABLE t (a INT)")?;
        engine.register_trigger(
            definition("guard", TriggerTiming::After, TriggerOperation::Insert),
            Box::new(RowCounter {
                label: "guard",
                storage: engine.storage(),
                events: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }),
        )?;
        assert!(matches!(
            session.execute("INSERT INTO t VALUES (1)"),
            Err(Error::Trigger(_))
        ));
        engine.unregister_trigger("public", "t", "guard")?;
        assert_eq!(rows(&mut session, "SELECT count(*) FROM t")?, vec![vec![Value::BigInt(0)]]);
        Ok(())
    }

    #[test]
    fn test_update_and_delete_triggers_see_rows() -> Result<()> {
        let (engine, mut session) =
            setup("CREATE TABLE t (a INT, b TEXT); INSERT INTO t VALUES (1, 'x'), (2, 'y');")?;
        let updates: Firings = Arc::default();
        let deletes: Firings = Arc::default();
        engine.register_trigger(
            definition("on_update", TriggerTiming::After, TriggerOperation::Update),
            Recorder::boxed(&updates, None),
        )?;
        engine.register_trigger(
            definition("on_delete", TriggerTiming::Before, TriggerOperation::Delete),
            Recorder::boxed(&deletes, None),
        )?;

        session.execute("UPDATE t SET b = 'z' WHERE a = 1")?;
        assert_eq!(
            *updates.lock()?,
            vec![(
                Some(Row::new(1, vec![Value::Integer(1), text("x")])),
                Some(Row::new(1, vec![Value::Integer(1), text("z")])),
            )]
        );

        session.execute("DELETE FROM t WHERE a = 2")?;
        assert_eq!(
            *deletes.lock()?,
            vec![(Some(Row::new(2, vec![Value::Integer(2), text("y")])), None::<Row>)]
        );
        Ok(())
    }

    #[test]
    fn test_select_triggers_fire_once_per_scan() -> Result<()> {
        let (engine, mut session) =
            setup("CREATE TABLE t (a INT); INSERT INTO t VALUES (1), (2), (3);")?;
        let scans: Firings = Arc::default();
        engine.register_trigger(
            definition("on_select", TriggerTiming::After, TriggerOperation::Select),
            Recorder::boxed(&scans, None),
        )?;
        session.execute("SELECT * FROM t")?;
        assert_eq!(*scans.lock()?, vec![(None::<Row>, None::<Row>)]);
        // A self join scans the table twice
        session.execute("SELECT * FROM t x, t y")?;
        assert_eq!(scans.lock()?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_failing_trigger_undoes_multi_row_changes() -> Result<()> {
        let (engine, mut session) =
            setup("CREATE TABLE t (a INT); INSERT INTO t VALUES (1), (2), (3);")?;
        let contents = |engine: &LocalEngine| -> Result<Vec<Row>> {
            Ok(engine.storage().lock()?.must_get_table("public", "t")?.all_rows())
        };
        let before = contents(&engine)?;

        // The second AFTER UPDATE firing fails once two rows have changed
        let firings: Firings = Arc::default();
        engine.register_trigger(
            definition("update_guard", TriggerTiming::After, TriggerOperation::Update),
            Recorder::boxed(&firings, Some(2)),
        )?;
        assert!(matches!(
            session.execute("UPDATE t SET a = a * 10"),
            Err(Error::Trigger(_))
        ));
        assert_eq!(contents(&engine)?, before);
        engine.unregister_trigger("public", "t", "update_guard")?;

        // The third BEFORE DELETE firing fails after two rows are gone
        let firings: Firings = Arc::default();
        engine.register_trigger(
            definition("delete_guard", TriggerTiming::Before, TriggerOperation::Delete),
            Recorder::boxed(&firings, Some(3)),
        )?;
        assert!(matches!(session.execute("DELETE FROM t"), Err(Error::Trigger(_))));
        assert_eq!(contents(&engine)?, before);

        // Inside a transaction only the failing statement is undone
        engine.unregister_trigger("public", "t", "delete_guard")?;
        session.execute_batch("BEGIN; DELETE FROM t WHERE a = 1;")?;
        engine.register_trigger(
            definition("delete_guard", TriggerTiming::After, TriggerOperation::Delete),
            Recorder::boxed(&Firings::default(), Some(2)),
        )?;
        assert!(matches!(session.execute("DELETE FROM t"), Err(Error::Trigger(_))));
        session.execute("COMMIT")?;
        assert_eq!(contents(&engine)?, before[1..].to_vec());
        Ok(())
    }

    #[test]
    fn test_rollback_after_table_recreated() -> Result<()> {
        let (_, mut session) = setup("CREATE TABLE t (a INT); INSERT INTO t VALUES (1);")?;
        session.execute_batch(
            "BEGIN;
             INSERT INTO t VALUES (2);
             DROP TABLE t;
             CREATE TABLE t (a INT, b INT UNIQUE);
             INSERT INTO t VALUES (7, 7);
             ROLLBACK;",
        )?;
        // The recreated table is not the one captured before the change
        assert!(rows(&mut session, "SELECT * FROM t")?.is_empty());
        session.execute("INSERT INTO t VALUES (5, 5)")?;
        session.execute("UPDATE t SET b = 6")?;
        assert_eq!(
            rows(&mut session, "SELECT a, b FROM t")?,
            vec![vec![Value::Integer(5), Value::Integer(6)]]
        );
        Ok(())
    }

    #[test]
    fn test_generated_keys() -> Result<()> {
        let (engine, mut session) = setup("CREATE TABLE t (id SERIAL PRIMARY KEY, name TEXT)")?;
        session.execute("INSERT INTO t (name) VALUES ('a'), ('b')")?;
        assert_eq!(
            engine.last_generated_keys("public", "t")?,
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]
        );
        session.execute("INSERT INTO t (name) VALUES ('c')")?;
        assert_eq!(
            engine.last_generated_keys("public", "t")?,
            vec![vec![Value::Integer(3)]]
        );
        // Keys of a rolled back INSERT are forgotten with its rows
        session.execute_batch("BEGIN; INSERT INTO t (name) VALUES ('d'); ROLLBACK;")?;
        assert_eq!(
            engine.last_generated_keys("public", "t")?,
            vec![vec![Value::Integer(3)]]
        );
        Ok(())
    }

    #[test]
    fn test_grouping_and_ordering() -> Result<()> {
        let (_, mut session) = setup(
            "CREATE TABLE emp (name TEXT, dept TEXT, salary INT);
             INSERT INTO emp VALUES ('a', 'x', 10), ('b', 'x', 20), ('c', 'y', 5), ('d', NULL, 1);",
        )?;
        assert_eq!(
            rows(
                &mut session,
                "SELECT dept, count(*) AS n, sum(salary) FROM emp GROUP BY dept HAVING count(*) > 1"
            )?,
            vec![vec![text("x"), Value::BigInt(2), Value::BigInt(30)]]
        );
        assert_eq!(
            rows(
                &mut session,
                "SELECT dept, max(salary) FROM emp GROUP BY 1 ORDER BY max(salary) DESC LIMIT 2"
            )?,
            vec![
                vec![text("x"), Value::Integer(20)],
                vec![text("y"), Value::Integer(5)],
            ]
        );
        assert_eq!(
            rows(&mut session, "SELECT count(*), sum(salary) FROM emp WHERE salary > 100")?,
            vec![vec![Value::BigInt(0), Value::Null]]
        );
        assert_eq!(
            rows(&mut session, "SELECT DISTINCT dept FROM emp ORDER BY dept")?,
            vec![vec![text("x")], vec![text("y")], vec![Value::Null]]
        );
        assert_eq!(
            rows(&mut session, "SELECT name FROM emp ORDER BY salary LIMIT 2 OFFSET 1")?,
            vec![vec![text("c")], vec![text("a")]]
        );
        Ok(())
    }

    #[test]
    fn test_subqueries() -> Result<()> {
        let (_, mut session) = setup(
            "CREATE TABLE a (x INT); CREATE TABLE b (x INT);
             INSERT INTO a VALUES (1), (2), (3); INSERT INTO b VALUES (2), (3), (3);",
        )?;
        assert_eq!(
            rows(&mut session, "SELECT x FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b.x = a.x) ORDER BY x")?,
            vec![vec![Value::Integer(2)], vec![Value::Integer(3)]]
        );
        assert_eq!(
            rows(&mut session, "SELECT x FROM a WHERE x NOT IN (SELECT x FROM b)")?,
            vec![vec![Value::Integer(1)]]
        );
        assert_eq!(
            rows(&mut session, "SELECT x, (SELECT count(*) FROM b WHERE b.x = a.x) FROM a ORDER BY 1")?,
            vec![
                vec![Value::Integer(1), Value::BigInt(0)],
                vec![Value::Integer(2), Value::BigInt(1)],
                vec![Value::Integer(3), Value::BigInt(2)],
            ]
        );
        assert_eq!(
            rows(&mut session, "SELECT s.total FROM (SELECT sum(x) AS total FROM b) AS s")?,
            vec![vec![Value::BigInt(8)]]
        );
        assert!(matches!(
            session.execute("SELECT (SELECT x FROM b)"),
            Err(Error::Execution(_))
        ));
        Ok(())
    }

    #[test]
    fn test_insert_select_and_delete() -> Result<()> {
        let (_, mut session) = setup(
            "CREATE TABLE src (a INT); CREATE TABLE dst (a INT, note TEXT DEFAULT 'copied');
             INSERT INTO src VALUES (1), (2), (3);",
        )?;
        let result = session.execute("INSERT INTO dst (a) SELECT a * 10 FROM src WHERE a > 1")?;
        assert_eq!(result, ResultSet::Insert { count: 2 });
        assert_eq!(
            rows(&mut session, "SELECT a, note FROM dst ORDER BY a")?,
            vec![
                vec![Value::Integer(20), text("copied")],
                vec![Value::Integer(30), text("copied")],
            ]
        );
        assert_eq!(session.execute("DELETE FROM src WHERE a <> 2")?, ResultSet::Delete { count: 2 });
        assert_eq!(rows(&mut session, "SELECT a FROM src")?, vec![vec![Value::Integer(2)]]);
        Ok(())
    }

    #[test]
    fn test_host_function() -> Result<()> {
        let (engine, mut session) = setup("")?;
        engine.register_function("double_it", |args: &[Value]| match args {
            [Value::Integer(v)] => Ok(Value::Integer(v * 2)),
            _ => Err(Error::Execution("double_it takes one integer".into())),
        })?;
        assert_eq!(
            rows(&mut session, "SELECT double_it(21)")?,
            vec![vec![Value::Integer(42)]]
        );
        assert_eq!(
            session.execute("SELECT no_such_fn(1)"),
            Err(Error::Execution("function no_such_fn(integer) does not exist".into()))
        );
        Ok(())
    }

    #[test]
    fn test_schemas() -> Result<()> {
        let (_, mut session) = setup("CREATE SCHEMA app; CREATE TABLE app.t (a INT);")?;
        session.execute("INSERT INTO app.t VALUES (7)")?;
        assert_eq!(rows(&mut session, "SELECT a FROM app.t")?, vec![vec![Value::Integer(7)]]);
        assert!(session.execute("DROP SCHEMA app").is_err());
        session.execute("DROP TABLE app.t; DROP SCHEMA app;")?;
        session.execute("DROP SCHEMA IF EXISTS app")?;
        session.execute("CREATE TABLE IF NOT EXISTS t (a INT)")?;
        session.execute("CREATE TABLE IF NOT EXISTS t (a INT)")?;
        assert!(session.execute("CREATE TABLE t (a INT)").is_err());
        assert_eq!(
            session.execute("DROP TABLE IF EXISTS t, missing")?,
            ResultSet::DropTable { table_names: vec!["t".into()] }
        );
        Ok(())
    }
}
