//! Execution plans.
//!
//! The planner turns a parsed statement into a tree of [`Node`]s. Query
//! nodes carry the output column metadata they produce, so names are
//! resolved and validated before any row is read.

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        eval::Scope,
        executor::{Context, Executor, ResultColumn, ResultSet},
        parser::ast::{self, Expression, JoinType, OrderDirection},
        schema::Table,
    },
};

mod planner;

pub use planner::Planner;

/// A node of the execution plan
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    CreateSchema {
        name: String,
        if_not_exists: bool,
    },
    DropSchema {
        name: String,
        if_exists: bool,
    },
    CreateTable {
        table: Table,
        if_not_exists: bool,
    },
    DropTable {
        /// (schema, table) pairs
        tables: Vec<(String, String)>,
        if_exists: bool,
    },
    Insert {
        table: Table,
        /// Target column positions, in the order values are supplied
        columns: Vec<usize>,
        source: InsertSource,
    },
    Update {
        table: Table,
        alias: Option<String>,
        predicate: Option<Expression>,
        /// Assignments by column position, evaluated against the old row
        assignments: Vec<(usize, Expression)>,
    },
    Delete {
        table: Table,
        alias: Option<String>,
        predicate: Option<Expression>,
    },

    /// A single row with no columns, the source of a FROM-less SELECT
    SingleRow,
    Scan {
        table: Table,
        alias: Option<String>,
    },
    /// A derived table, relabelled under its alias
    Subquery {
        source: Box<Node>,
        alias: Option<String>,
    },
    NestedLoopJoin {
        left: Box<Node>,
        right: Box<Node>,
        join_type: JoinType,
        predicate: Option<Expression>,
        /// Column pairs merged by USING or NATURAL, as (left, right)
        /// positions
        using: Vec<(usize, usize)>,
    },
    Filter {
        source: Box<Node>,
        predicate: Expression,
    },
    Projection {
        source: Box<Node>,
        exprs: Vec<(Expression, ResultColumn)>,
    },
    Aggregate {
        source: Box<Node>,
        group_by: Vec<Expression>,
        having: Option<Expression>,
        exprs: Vec<(Expression, ResultColumn)>,
    },
    Distinct {
        source: Box<Node>,
    },
    Order {
        source: Box<Node>,
        keys: Vec<OrderKey>,
    },
    Offset {
        source: Box<Node>,
        offset: Expression,
    },
    Limit {
        source: Box<Node>,
        limit: Expression,
    },
    /// Drops trailing columns that only fed ORDER BY
    Truncate {
        source: Box<Node>,
        width: usize,
    },
}

/// Row source of an INSERT
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// `None` entries take the column default
    Values(Vec<Vec<Option<Expression>>>),
    Query(Box<Node>),
}

/// A sort key over a column of the projected rows
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub index: usize,
    pub direction: OrderDirection,
    pub nulls_first: bool,
}

impl Node {
    /// The output columns of a query node. Statement nodes have none.
    pub fn columns(&self) -> Vec<ResultColumn> {
        match self {
            Node::Scan { table, alias } => {
                let qualifier = alias.as_deref().unwrap_or(&table.name);
                table
                    .columns
                    .iter()
                    .map(|c| ResultColumn::new(Some(qualifier), &c.name, Some(c.datatype.clone())))
                    .collect()
            }
            Node::Subquery { source, alias } => source
                .columns()
                .into_iter()
                .map(|mut c| {
                    c.table = alias.clone();
                    c
                })
                .collect(),
            Node::NestedLoopJoin {
                left, right, using, ..
            } => join_columns(&left.columns(), &right.columns(), using),
            Node::Projection { exprs, .. } | Node::Aggregate { exprs, .. } => {
                exprs.iter().map(|(_, c)| c.clone()).collect()
            }
            Node::Filter { source, .. }
            | Node::Distinct { source }
            | Node::Order { source, .. }
            | Node::Offset { source, .. }
            | Node::Limit { source, .. } => source.columns(),
            Node::Truncate { source, width } => {
                let mut columns = source.columns();
                columns.truncate(*width);
                columns
            }
            _ => Vec::new(),
        }
    }
}

/// Output layout of a join: merged USING columns first, then the remaining
/// left columns, then the remaining right columns
pub fn join_columns(
    left: &[ResultColumn],
    right: &[ResultColumn],
    using: &[(usize, usize)],
) -> Vec<ResultColumn> {
    if using.is_empty() {
        return left.iter().chain(right).cloned().collect();
    }
    let mut columns: Vec<ResultColumn> = using.iter().map(|(l, _)| left[*l].clone()).collect();
    columns.extend(
        left.iter()
            .enumerate()
            .filter(|(i, _)| !using.iter().any(|(l, _)| l == i))
            .map(|(_, c)| c.clone()),
    );
    columns.extend(
        right
            .iter()
            .enumerate()
            .filter(|(i, _)| !using.iter().any(|(_, r)| r == i))
            .map(|(_, c)| c.clone()),
    );
    columns
}

/// An execution plan, ready to run
#[derive(Debug, PartialEq)]
pub struct Plan(pub Node);

impl Plan {
    pub fn build<T: Transaction>(statement: ast::Statement, ctx: &Context<T>) -> Result<Self> {
        Planner::new(ctx).build(statement)
    }

    pub fn execute<T: Transaction>(self, ctx: &Context<T>) -> Result<ResultSet> {
        <dyn Executor<T>>::build(self.0).execute(ctx, None::<&Scope>)
    }
}
