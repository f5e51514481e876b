use tracing::debug;

use crate::{
    error::{Error, Result},
    sql::{engine::Transaction, eval::Scope, schema::Table},
};

use super::{Context, Executor, ResultSet};

/// CREATE SCHEMA executor
pub struct CreateSchema {
    name: String,
    if_not_exists: bool,
}

impl CreateSchema {
    pub fn new(name: String, if_not_exists: bool) -> Box<Self> {
        Box::new(Self {
            name,
            if_not_exists,
        })
    }
}

impl<T: Transaction> Executor<T> for CreateSchema {
    fn execute(self: Box<Self>, ctx: &Context<T>, _outer: Option<&Scope>) -> Result<ResultSet> {
        if ctx.txn.has_schema(&self.name)? {
            if self.if_not_exists {
                debug!(schema = %self.name, "schema exists, skipping");
                return Ok(ResultSet::CreateSchema { name: self.name });
            }
            return Err(Error::Execution(format!(
                "schema \"{}\" already exists",
                self.name
            )));
        }
        ctx.txn.create_schema(&self.name)?;
        Ok(ResultSet::CreateSchema { name: self.name })
    }
}

/// DROP SCHEMA executor
pub struct DropSchema {
    name: String,
    if_exists: bool,
}

impl DropSchema {
    pub fn new(name: String, if_exists: bool) -> Box<Self> {
        Box::new(Self { name, if_exists })
    }
}

impl<T: Transaction> Executor<T> for DropSchema {
    fn execute(self: Box<Self>, ctx: &Context<T>, _outer: Option<&Scope>) -> Result<ResultSet> {
        if !ctx.txn.has_schema(&self.name)? {
            if self.if_exists {
                return Ok(ResultSet::DropSchema { name: self.name });
            }
            return Err(Error::Execution(format!(
                "schema \"{}\" does not exist",
                self.name
            )));
        }
        ctx.txn.drop_schema(&self.name)?;
        Ok(ResultSet::DropSchema { name: self.name })
    }
}

/// CREATE TABLE executor
pub struct CreateTable {
    table: Table,
    if_not_exists: bool,
}

impl CreateTable {
    pub fn new(table: Table, if_not_exists: bool) -> Box<Self> {
        Box::new(Self {
            table,
            if_not_exists,
        })
    }
}

impl<T: Transaction> Executor<T> for CreateTable {
    fn execute(self: Box<Self>, ctx: &Context<T>, _outer: Option<&Scope>) -> Result<ResultSet> {
        let table_name = self.table.name.clone();
        if self.if_not_exists && ctx.txn.get_table(&self.table.schema, &table_name)?.is_some() {
            debug!(table = %table_name, "relation exists, skipping");
            return Ok(ResultSet::CreateTable { table_name });
        }
        ctx.txn.create_table(self.table)?;
        Ok(ResultSet::CreateTable { table_name })
    }
}

/// DROP TABLE executor. Every named table must exist unless IF EXISTS is
/// given; nothing is dropped when one is missing.
pub struct DropTable {
    tables: Vec<(String, String)>,
    if_exists: bool,
}

impl DropTable {
    pub fn new(tables: Vec<(String, String)>, if_exists: bool) -> Box<Self> {
        Box::new(Self { tables, if_exists })
    }
}

impl<T: Transaction> Executor<T> for DropTable {
    fn execute(self: Box<Self>, ctx: &Context<T>, _outer: Option<&Scope>) -> Result<ResultSet> {
        let mut existing = Vec::with_capacity(self.tables.len());
        for (schema, name) in self.tables {
            if ctx.txn.get_table(&schema, &name)?.is_some() {
                existing.push((schema, name));
            } else if !self.if_exists {
                return Err(Error::Execution(format!(
                    "table \"{}\" does not exist",
                    name
                )));
            }
        }
        let mut table_names = Vec::with_capacity(existing.len());
        for (schema, name) in existing {
            ctx.txn.drop_table(&schema, &name)?;
            table_names.push(name);
        }
        Ok(ResultSet::DropTable { table_names })
    }
}
