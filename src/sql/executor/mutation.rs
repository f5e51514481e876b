use tracing::debug;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        eval::{Scope, evaluate, is_true},
        parser::ast::Expression,
        plan::InsertSource,
        schema::Table,
        types::{Tuple, Value},
    },
    storage::Row,
};

use super::{Context, Executor, ResultColumn, ResultSet};

/// INSERT executor
pub struct Insert<T: Transaction> {
    table: Table,
    /// Target column positions, in the order values are supplied
    columns: Vec<usize>,
    source: Source<T>,
}

enum Source<T: Transaction> {
    Values(Vec<Vec<Option<Expression>>>),
    Query(Box<dyn Executor<T>>),
}

impl<T: Transaction> Insert<T> {
    pub fn new(table: Table, columns: Vec<usize>, source: InsertSource) -> Box<Self> {
        let source = match source {
            InsertSource::Values(rows) => Source::Values(rows),
            InsertSource::Query(node) => Source::Query(<dyn Executor<T>>::build(*node)),
        };
        Box::new(Self {
            table,
            columns,
            source,
        })
    }
}

/// The value of a column nobody supplied: the next sequence value for a
/// serial column, the declared default, or NULL
fn default_value<T: Transaction>(table: &Table, index: usize, ctx: &Context<T>) -> Result<Value> {
    let column = &table.columns[index];
    if column.auto_increment {
        let next = ctx
            .txn
            .next_sequence_value(&table.schema, &table.name, &column.name)?;
        return column.datatype.convert_value(Value::BigInt(next));
    }
    Ok(column.default.clone().unwrap_or(Value::Null))
}

// Aligns supplied values with the table layout
// tbl(a, b, c, d):
// INSERT INTO tbl (d, b) VALUES (1, 2);
//    a        b       c        d
// default     2    default     1
fn make_row<T: Transaction>(
    table: &Table,
    targets: &[usize],
    supplied: Vec<Option<Value>>,
    ctx: &Context<T>,
) -> Result<Tuple> {
    if supplied.len() > targets.len() {
        return Err(Error::Execution(
            "INSERT has more expressions than target columns".into(),
        ));
    }
    let mut row: Vec<Option<Value>> = vec![None; table.columns.len()];
    for (position, value) in targets.iter().zip(supplied) {
        row[*position] = value;
    }
    row.into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Some(value) => Ok(value),
            None => default_value(table, index, ctx),
        })
        .collect()
}

impl<T: Transaction> Executor<T> for Insert<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let Self {
            table,
            columns,
            source,
        } = *self;
        let supplied: Vec<Vec<Option<Value>>> = match source {
            Source::Values(rows) => rows
                .iter()
                .map(|exprs| {
                    exprs
                        .iter()
                        .map(|expr| match expr {
                            Some(expr) => evaluate(expr, &Scope::empty(), ctx).map(Some),
                            None => Ok(None),
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<_>>()?,
            Source::Query(query) => {
                let (_, rows) = query.execute(ctx, outer)?.into_query()?;
                rows.into_iter()
                    .map(|row| row.into_iter().map(Some).collect())
                    .collect()
            }
        };

        let rows = supplied
            .into_iter()
            .map(|values| make_row(&table, &columns, values, ctx))
            .collect::<Result<Vec<_>>>()?;
        let inserted = ctx.txn.insert_rows(&table.schema, &table.name, rows)?;
        debug!(table = %table.name, count = inserted.len(), "insert");
        Ok(ResultSet::Insert {
            count: inserted.len(),
        })
    }
}

/// Rows of the target table matching an UPDATE/DELETE predicate. Column
/// references resolve against the table's alias, or its name without one.
fn matching_rows<T: Transaction>(
    table: &Table,
    alias: Option<&str>,
    predicate: Option<&Expression>,
    ctx: &Context<T>,
    outer: Option<&Scope>,
) -> Result<(Vec<ResultColumn>, Vec<Row>)> {
    let qualifier = alias.unwrap_or(&table.name);
    let columns: Vec<ResultColumn> = table
        .columns
        .iter()
        .map(|c| ResultColumn::new(Some(qualifier), &c.name, Some(c.datatype.clone())))
        .collect();
    let mut matched = Vec::new();
    for row in ctx.txn.scan_table(&table.schema, &table.name)? {
        let keep = match predicate {
            Some(predicate) => {
                let scope = Scope::new(&columns, &row.values).with_outer(outer);
                is_true(predicate, &scope, ctx, "WHERE")?
            }
            None => true,
        };
        if keep {
            matched.push(row);
        }
    }
    Ok((columns, matched))
}

/// UPDATE executor
pub struct Update {
    table: Table,
    alias: Option<String>,
    predicate: Option<Expression>,
    assignments: Vec<(usize, Expression)>,
}

impl Update {
    pub fn new(
        table: Table,
        alias: Option<String>,
        predicate: Option<Expression>,
        assignments: Vec<(usize, Expression)>,
    ) -> Box<Self> {
        Box::new(Self {
            table,
            alias,
            predicate,
            assignments,
        })
    }
}

impl<T: Transaction> Executor<T> for Update {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (columns, rows) = matching_rows(
            &self.table,
            self.alias.as_deref(),
            self.predicate.as_ref(),
            ctx,
            outer,
        )?;
        let mut count = 0;
        for row in rows {
            // Every assignment reads the old row
            let mut values = row.values.clone();
            {
                let scope = Scope::new(&columns, &row.values).with_outer(outer);
                for (index, expr) in &self.assignments {
                    values[*index] = evaluate(expr, &scope, ctx)?;
                }
            }
            ctx.txn
                .update_row(&self.table.schema, &self.table.name, row.id, values)?;
            count += 1;
        }
        debug!(table = %self.table.name, count, "update");
        Ok(ResultSet::Update { count })
    }
}

/// DELETE executor
pub struct Delete {
    table: Table,
    alias: Option<String>,
    predicate: Option<Expression>,
}

impl Delete {
    pub fn new(table: Table, alias: Option<String>, predicate: Option<Expression>) -> Box<Self> {
        Box::new(Self {
            table,
            alias,
            predicate,
        })
    }
}

impl<T: Transaction> Executor<T> for Delete {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (_, rows) = matching_rows(
            &self.table,
            self.alias.as_deref(),
            self.predicate.as_ref(),
            ctx,
            outer,
        )?;
        for row in &rows {
            ctx.txn
                .delete_row(&self.table.schema, &self.table.name, row.id)?;
        }
        debug!(table = %self.table.name, count = rows.len(), "delete");
        Ok(ResultSet::Delete { count: rows.len() })
    }
}
