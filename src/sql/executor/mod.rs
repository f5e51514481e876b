use std::{cmp::Ordering, fmt::Display};

use chrono::{DateTime, Utc};

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        eval::{FunctionRegistry, Scope},
        executor::{
            agg::Aggregate,
            join::NestedLoopJoin,
            mutation::{Delete, Insert, Update},
            query::{Distinct, Filter, Limit, Offset, Order, Projection, Scan, SingleRow, Subquery, Truncate},
            schema::{CreateSchema, CreateTable, DropSchema, DropTable},
        },
        parser::ast,
        plan::{Node, Planner},
        types::{DataType, Tuple},
    },
    storage::IsolationLevel,
};

mod agg;
mod join;
mod mutation;
mod query;
mod schema;

/// Everything a running statement reads besides its rows
pub struct Context<'a, T: Transaction> {
    pub txn: &'a T,
    pub functions: &'a FunctionRegistry,
    /// Schema of unqualified table names
    pub schema: &'a str,
    /// Statement timestamp, read by now() and friends
    pub now: DateTime<Utc>,
}

impl<'a, T: Transaction> Context<'a, T> {
    pub fn new(txn: &'a T, functions: &'a FunctionRegistry, schema: &'a str) -> Self {
        Self {
            txn,
            functions,
            schema,
            now: Utc::now(),
        }
    }
}

/// SQL executor trait
pub trait Executor<T: Transaction> {
    /// Runs the node. `outer` binds the enclosing query's row when the node
    /// belongs to a correlated subquery.
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet>;
}

/// Builds an executor from a plan node
impl<T: Transaction> dyn Executor<T> {
    pub fn build(node: Node) -> Box<dyn Executor<T>> {
        match node {
            Node::CreateSchema {
                name,
                if_not_exists,
            } => CreateSchema::new(name, if_not_exists),
            Node::DropSchema { name, if_exists } => DropSchema::new(name, if_exists),
            Node::CreateTable {
                table,
                if_not_exists,
            } => CreateTable::new(table, if_not_exists),
            Node::DropTable { tables, if_exists } => DropTable::new(tables, if_exists),
            Node::Insert {
                table,
                columns,
                source,
            } => Insert::new(table, columns, source),
            Node::Update {
                table,
                alias,
                predicate,
                assignments,
            } => Update::new(table, alias, predicate, assignments),
            Node::Delete {
                table,
                alias,
                predicate,
            } => Delete::new(table, alias, predicate),
            Node::SingleRow => SingleRow::new(),
            Node::Scan { table, alias } => Scan::new(table, alias),
            Node::Subquery { source, alias } => Subquery::new(Self::build(*source), alias),
            Node::NestedLoopJoin {
                left,
                right,
                join_type,
                predicate,
                using,
            } => NestedLoopJoin::new(
                Self::build(*left),
                Self::build(*right),
                join_type,
                predicate,
                using,
            ),
            Node::Filter { source, predicate } => Filter::new(Self::build(*source), predicate),
            Node::Projection { source, exprs } => Projection::new(Self::build(*source), exprs),
            Node::Aggregate {
                source,
                group_by,
                having,
                exprs,
            } => Aggregate::new(Self::build(*source), group_by, having, exprs),
            Node::Distinct { source } => Distinct::new(Self::build(*source)),
            Node::Order { source, keys } => Order::new(Self::build(*source), keys),
            Node::Offset { source, offset } => Offset::new(Self::build(*source), offset),
            Node::Limit { source, limit } => Limit::new(Self::build(*source), limit),
            Node::Truncate { source, width } => Truncate::new(Self::build(*source), width),
        }
    }
}

/// Plans and runs a nested SELECT, returning its columns and rows
pub fn execute_select<T: Transaction>(
    query: &ast::Select,
    ctx: &Context<T>,
    outer: Option<&Scope>,
) -> Result<(Vec<ResultColumn>, Vec<Tuple>)> {
    let node = Planner::new(ctx).build_select(query, outer)?;
    <dyn Executor<T>>::build(node).execute(ctx, outer)?.into_query()
}

/// Metadata of one output column
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    /// Table or alias the column comes from, when it is a plain column
    pub table: Option<String>,
    pub name: String,
    /// Declared or inferred type, None while unknown
    pub datatype: Option<DataType>,
}

impl ResultColumn {
    pub fn new(table: Option<&str>, name: &str, datatype: Option<DataType>) -> Self {
        Self {
            table: table.map(str::to_string),
            name: name.to_string(),
            datatype,
        }
    }
}

/// Statement category of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Transaction,
}

impl Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Ddl => "DDL",
            StatementKind::Transaction => "TRANSACTION",
        })
    }
}

/// Execution result set
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    Begin { version: u64, isolation: IsolationLevel },
    Commit { version: u64 },
    Rollback { version: u64 },
    CreateSchema { name: String },
    DropSchema { name: String },
    CreateTable { table_name: String },
    DropTable { table_names: Vec<String> },
    Insert { count: usize },
    Update { count: usize },
    Delete { count: usize },
    Query { columns: Vec<ResultColumn>, rows: Vec<Tuple> },
}

impl ResultSet {
    pub fn kind(&self) -> StatementKind {
        match self {
            ResultSet::Begin { .. } | ResultSet::Commit { .. } | ResultSet::Rollback { .. } => {
                StatementKind::Transaction
            }
            ResultSet::CreateSchema { .. }
            | ResultSet::DropSchema { .. }
            | ResultSet::CreateTable { .. }
            | ResultSet::DropTable { .. } => StatementKind::Ddl,
            ResultSet::Insert { .. } => StatementKind::Insert,
            ResultSet::Update { .. } => StatementKind::Update,
            ResultSet::Delete { .. } => StatementKind::Delete,
            ResultSet::Query { .. } => StatementKind::Select,
        }
    }

    /// Output columns of a query, empty for other statements
    pub fn columns(&self) -> &[ResultColumn] {
        match self {
            ResultSet::Query { columns, .. } => columns,
            _ => &[],
        }
    }

    /// Rows of a query, empty for other statements
    pub fn rows(&self) -> &[Tuple] {
        match self {
            ResultSet::Query { rows, .. } => rows,
            _ => &[],
        }
    }

    /// Rows written by INSERT/UPDATE/DELETE, rows returned by a query
    pub fn affected_rows(&self) -> usize {
        match self {
            ResultSet::Insert { count }
            | ResultSet::Update { count }
            | ResultSet::Delete { count } => *count,
            ResultSet::Query { rows, .. } => rows.len(),
            _ => 0,
        }
    }

    pub fn into_query(self) -> Result<(Vec<ResultColumn>, Vec<Tuple>)> {
        match self {
            ResultSet::Query { columns, rows } => Ok((columns, rows)),
            result => Err(Error::Internal(format!(
                "unexpected result set {:?}",
                result.kind()
            ))),
        }
    }
}

/// A row ordered by [`Value::total_cmp`](crate::sql::types::Value::total_cmp),
/// for grouping and DISTINCT
#[derive(Debug, Clone)]
struct RowKey(Tuple);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}
