//! Transactions over the in-memory store.
//!
//! Changes are applied to storage in place as statements run. Two logs make
//! them reversible:
//!
//! * a per-statement undo log, replayed in reverse when a statement fails,
//!   so no partial statement is ever left visible;
//! * a [`Snapshot`] of the whole store, captured lazily before the first data
//!   change of an explicit transaction and restored on rollback.
//!
//! DDL is applied directly and is not undone by either.

use std::{
    fmt::Display,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    sql::{schema, types::Tuple},
    storage::{
        memory::MemoryStorage,
        row::{Row, RowId},
        snapshot::Snapshot,
        trigger::{TriggerOperation, TriggerRegistry, TriggerTiming},
    },
};

/// Requested isolation level. Every level is accepted; the store itself
/// provides read-committed visibility plus rollback of the owner's changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        })
    }
}

/// Transaction lifecycle. Committed and RolledBack are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Inverse of one applied row change
#[derive(Debug)]
enum Undo {
    Insert { schema: String, table: String, id: RowId },
    Update { schema: String, table: String, old: Row },
    Delete { schema: String, table: String, old: Row },
    GeneratedKeys { schema: String, table: String, keys: Vec<Tuple> },
}

/// Issues transactions against one store
#[derive(Clone)]
pub struct TransactionManager {
    storage: Arc<Mutex<MemoryStorage>>,
    triggers: Arc<TriggerRegistry>,
    next_version: Arc<AtomicU64>,
}

impl TransactionManager {
    pub fn new(storage: Arc<Mutex<MemoryStorage>>, triggers: Arc<TriggerRegistry>) -> Self {
        Self {
            storage,
            triggers,
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Begins an explicit transaction, which snapshots the store before its
    /// first data change
    pub fn begin(&self, isolation: IsolationLevel) -> Result<Transaction> {
        self.begin_inner(isolation, true)
    }

    /// Begins an autocommit transaction covering a single statement. The
    /// statement undo log is enough to reverse it, so no snapshot is taken.
    pub fn begin_implicit(&self, isolation: IsolationLevel) -> Result<Transaction> {
        self.begin_inner(isolation, false)
    }

    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        txn.commit()
    }

    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        txn.rollback()
    }

    fn begin_inner(&self, isolation: IsolationLevel, explicit: bool) -> Result<Transaction> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        debug!(txn = version, %isolation, explicit, "begin transaction");
        Ok(Transaction {
            version,
            isolation,
            explicit,
            storage: self.storage.clone(),
            triggers: self.triggers.clone(),
            inner: Mutex::new(Inner {
                state: TransactionState::Active,
                snapshot: None,
                undo: Vec::new(),
            }),
        })
    }
}

struct Inner {
    state: TransactionState,
    snapshot: Option<Snapshot>,
    undo: Vec<Undo>,
}

/// A transaction handle
///
/// Locks are never nested: the store lock and the handle's own state lock
/// are each taken and released on their own, and triggers run with neither
/// held.
pub struct Transaction {
    version: u64,
    isolation: IsolationLevel,
    explicit: bool,
    storage: Arc<Mutex<MemoryStorage>>,
    triggers: Arc<TriggerRegistry>,
    inner: Mutex<Inner>,
}

impl Transaction {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Whether this transaction was opened with BEGIN rather than autocommit
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn state(&self) -> Result<TransactionState> {
        Ok(self.inner.lock()?.state)
    }

    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        Self::expect_active(inner.state, self.version)?;
        inner.state = TransactionState::Committed;
        inner.snapshot = None;
        inner.undo.clear();
        debug!(txn = self.version, "commit transaction");
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock()?;
            Self::expect_active(inner.state, self.version)?;
            inner.state = TransactionState::RolledBack;
            inner.undo.clear();
            inner.snapshot.take()
        };
        if let Some(snapshot) = snapshot {
            let mut storage = self.storage.lock()?;
            snapshot.restore(&mut storage)?;
        }
        debug!(txn = self.version, "rollback transaction");
        Ok(())
    }

    /// Starts a statement: its changes are logged so a failure can reverse
    /// them
    pub fn begin_statement(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        Self::expect_active(inner.state, self.version)?;
        inner.undo.clear();
        Ok(())
    }

    /// Reverses every change of the current statement
    pub fn abort_statement(&self) -> Result<()> {
        let undo = std::mem::take(&mut self.inner.lock()?.undo);
        if undo.is_empty() {
            return Ok(());
        }
        debug!(txn = self.version, changes = undo.len(), "undoing failed statement");
        let mut storage = self.storage.lock()?;
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Insert { schema, table, id } => {
                    storage.must_get_table_mut(&schema, &table)?.remove_row(id);
                }
                Undo::Update { schema, table, old } | Undo::Delete { schema, table, old } => {
                    storage.must_get_table_mut(&schema, &table)?.put_row(old);
                }
                Undo::GeneratedKeys { schema, table, keys } => {
                    storage
                        .must_get_table_mut(&schema, &table)?
                        .set_last_generated_keys(keys);
                }
            }
        }
        Ok(())
    }

    pub fn create_schema(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        self.storage.lock()?.create_schema(name)
    }

    pub fn drop_schema(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        self.storage.lock()?.drop_schema(name)
    }

    pub fn has_schema(&self, name: &str) -> Result<bool> {
        Ok(self.storage.lock()?.get_schema(name).is_some())
    }

    pub fn create_table(&self, definition: schema::Table) -> Result<()> {
        self.ensure_active()?;
        debug!(schema = %definition.schema, table = %definition.name, "create table");
        self.storage.lock()?.create_table(definition)
    }

    pub fn drop_table(&self, schema: &str, name: &str) -> Result<()> {
        self.ensure_active()?;
        debug!(schema, table = name, "drop table");
        self.storage.lock()?.drop_table(schema, name)?;
        self.triggers.drop_table(schema, name)
    }

    /// The definition of a table, if it exists
    pub fn get_table(&self, schema: &str, name: &str) -> Result<Option<schema::Table>> {
        Ok(self
            .storage
            .lock()?
            .get_table(schema, name)
            .map(|t| t.definition().clone()))
    }

    /// Full scan of a table in id order. SELECT triggers fire once around
    /// the scan.
    pub fn scan(&self, schema: &str, table: &str) -> Result<Vec<Row>> {
        self.ensure_active()?;
        self.fire(schema, table, TriggerTiming::Before, TriggerOperation::Select, None, None)?;
        let rows = self.storage.lock()?.must_get_table(schema, table)?.all_rows();
        trace!(schema, table, rows = rows.len(), "scan");
        self.fire(schema, table, TriggerTiming::After, TriggerOperation::Select, None, None)?;
        Ok(rows)
    }

    /// Next value of a serial column's sequence
    pub fn next_sequence_value(&self, schema: &str, table: &str, column: &str) -> Result<i64> {
        self.ensure_active()?;
        self.storage
            .lock()?
            .must_get_table_mut(schema, table)?
            .next_sequence_value(column)
    }

    /// Validates and inserts rows one at a time, firing BEFORE-INSERT before
    /// each row becomes visible and AFTER-INSERT once it is. Records the
    /// generated keys of the batch on the table.
    pub fn insert(&self, schema: &str, table: &str, rows: Vec<Tuple>) -> Result<Vec<Row>> {
        self.prepare_write()?;
        let mut inserted = Vec::with_capacity(rows.len());
        let mut keys = Vec::with_capacity(rows.len());
        for values in rows {
            let row = {
                let mut storage = self.storage.lock()?;
                let t = storage.must_get_table_mut(schema, table)?;
                let values = t.definition().validate_row(values)?;
                Row::new(t.allocate_id(), values)
            };
            self.fire(schema, table, TriggerTiming::Before, TriggerOperation::Insert, None, Some(&row))?;
            {
                let mut storage = self.storage.lock()?;
                let t = storage.must_get_table_mut(schema, table)?;
                t.check_unique(&row.values, None)?;
                keys.push(t.generated_key(&row));
                t.put_row(row.clone());
            }
            self.log(Undo::Insert {
                schema: schema.to_string(),
                table: table.to_string(),
                id: row.id,
            })?;
            trace!(schema, table, id = row.id, "inserted row");
            self.fire(schema, table, TriggerTiming::After, TriggerOperation::Insert, None, Some(&row))?;
            inserted.push(row);
        }
        let previous = self
            .storage
            .lock()?
            .must_get_table_mut(schema, table)?
            .set_last_generated_keys(keys);
        self.log(Undo::GeneratedKeys {
            schema: schema.to_string(),
            table: table.to_string(),
            keys: previous,
        })?;
        Ok(inserted)
    }

    /// Replaces a row's values, keeping its id
    pub fn update(&self, schema: &str, table: &str, id: RowId, values: Tuple) -> Result<Row> {
        self.prepare_write()?;
        let (old, new) = {
            let storage = self.storage.lock()?;
            let t = storage.must_get_table(schema, table)?;
            let old = t.get_row(id).cloned().ok_or_else(|| Self::no_such_row(table, id))?;
            let values = t.definition().validate_row(values)?;
            let new = old.with_values(values);
            (old, new)
        };
        self.fire(schema, table, TriggerTiming::Before, TriggerOperation::Update, Some(&old), Some(&new))?;
        {
            let mut storage = self.storage.lock()?;
            let t = storage.must_get_table_mut(schema, table)?;
            t.check_unique(&new.values, Some(id))?;
            t.put_row(new.clone());
        }
        trace!(schema, table, id, "updated row");
        self.log(Undo::Update {
            schema: schema.to_string(),
            table: table.to_string(),
            old: old.clone(),
        })?;
        self.fire(schema, table, TriggerTiming::After, TriggerOperation::Update, Some(&old), Some(&new))?;
        Ok(new)
    }

    /// Removes a row by id
    pub fn delete(&self, schema: &str, table: &str, id: RowId) -> Result<()> {
        self.prepare_write()?;
        let old = self
            .storage
            .lock()?
            .must_get_table(schema, table)?
            .get_row(id)
            .cloned()
            .ok_or_else(|| Self::no_such_row(table, id))?;
        self.fire(schema, table, TriggerTiming::Before, TriggerOperation::Delete, Some(&old), None)?;
        self.storage
            .lock()?
            .must_get_table_mut(schema, table)?
            .remove_row(id);
        trace!(schema, table, id, "deleted row");
        self.log(Undo::Delete {
            schema: schema.to_string(),
            table: table.to_string(),
            old: old.clone(),
        })?;
        self.fire(schema, table, TriggerTiming::After, TriggerOperation::Delete, Some(&old), None)
    }

    fn fire(
        &self,
        schema: &str,
        table: &str,
        timing: TriggerTiming,
        operation: TriggerOperation,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<()> {
        self.triggers.fire(schema, table, timing, operation, old, new)
    }

    fn log(&self, entry: Undo) -> Result<()> {
        self.inner.lock()?.undo.push(entry);
        Ok(())
    }

    /// Checks the transaction is usable for a data change and captures the
    /// rollback snapshot on the first one of an explicit transaction
    fn prepare_write(&self) -> Result<()> {
        let needs_snapshot = {
            let inner = self.inner.lock()?;
            Self::expect_active(inner.state, self.version)?;
            self.explicit && inner.snapshot.is_none()
        };
        if needs_snapshot {
            let snapshot = {
                let storage = self.storage.lock()?;
                Snapshot::capture(&storage)?
            };
            self.inner.lock()?.snapshot = Some(snapshot);
            debug!(txn = self.version, "snapshot taken before first change");
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        Self::expect_active(self.inner.lock()?.state, self.version)
    }

    fn expect_active(state: TransactionState, version: u64) -> Result<()> {
        match state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(Error::TransactionState(format!(
                "transaction {} is already committed",
                version
            ))),
            TransactionState::RolledBack => Err(Error::TransactionState(format!(
                "transaction {} is already rolled back",
                version
            ))),
        }
    }

    fn no_such_row(table: &str, id: RowId) -> Error {
        Error::Execution(format!("row {} of relation \"{}\" does not exist", id, table))
    }
}
