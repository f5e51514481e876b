//! In-memory storage: catalog, rows, triggers and transactions

pub mod memory;
pub mod row;
mod snapshot;
pub mod table;
pub mod trigger;
pub mod txn;

pub use memory::{MemoryStorage, Schema};
pub use row::{Row, RowId};
pub use table::Table;
pub use trigger::{Trigger, TriggerDefinition, TriggerOperation, TriggerRegistry, TriggerTiming};
pub use txn::{IsolationLevel, Transaction, TransactionManager, TransactionState};
