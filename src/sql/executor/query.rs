use std::{cmp::Ordering, collections::BTreeSet};

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        eval::{Scope, evaluate, is_true},
        executor::{Context, ResultColumn, ResultSet, RowKey},
        parser::ast::{Expression, OrderDirection},
        plan::OrderKey,
        schema::Table,
        types::Value,
    },
};

use super::Executor;

/// One empty row: the source of a SELECT without FROM
pub struct SingleRow;

impl SingleRow {
    pub fn new() -> Box<Self> {
        Box::new(Self)
    }
}

impl<T: Transaction> Executor<T> for SingleRow {
    fn execute(self: Box<Self>, _ctx: &Context<T>, _outer: Option<&Scope>) -> Result<ResultSet> {
        Ok(ResultSet::Query {
            columns: Vec::new(),
            rows: vec![Vec::new()],
        })
    }
}

/// Full table scan
pub struct Scan {
    table: Table,
    alias: Option<String>,
}

impl Scan {
    pub fn new(table: Table, alias: Option<String>) -> Box<Self> {
        Box::new(Self { table, alias })
    }
}

impl<T: Transaction> Executor<T> for Scan {
    fn execute(self: Box<Self>, ctx: &Context<T>, _outer: Option<&Scope>) -> Result<ResultSet> {
        let qualifier = self.alias.as_deref().unwrap_or(&self.table.name);
        let columns = self
            .table
            .columns
            .iter()
            .map(|c| ResultColumn::new(Some(qualifier), &c.name, Some(c.datatype.clone())))
            .collect();
        let rows = ctx
            .txn
            .scan_table(&self.table.schema, &self.table.name)?
            .into_iter()
            .map(|row| row.values)
            .collect();
        Ok(ResultSet::Query { columns, rows })
    }
}

/// Derived table: runs the inner query and renames its columns' source
pub struct Subquery<T: Transaction> {
    source: Box<dyn Executor<T>>,
    alias: Option<String>,
}

impl<T: Transaction> Subquery<T> {
    pub fn new(source: Box<dyn Executor<T>>, alias: Option<String>) -> Box<Self> {
        Box::new(Self { source, alias })
    }
}

impl<T: Transaction> Executor<T> for Subquery<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (mut columns, rows) = self.source.execute(ctx, outer)?.into_query()?;
        for column in &mut columns {
            column.table = self.alias.clone();
        }
        Ok(ResultSet::Query { columns, rows })
    }
}

/// WHERE: keeps rows whose predicate is TRUE
pub struct Filter<T: Transaction> {
    source: Box<dyn Executor<T>>,
    predicate: Expression,
}

impl<T: Transaction> Filter<T> {
    pub fn new(source: Box<dyn Executor<T>>, predicate: Expression) -> Box<Self> {
        Box::new(Self { source, predicate })
    }
}

impl<T: Transaction> Executor<T> for Filter<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (columns, rows) = self.source.execute(ctx, outer)?.into_query()?;
        let mut kept = Vec::new();
        for row in rows {
            let scope = Scope::new(&columns, &row).with_outer(outer);
            if is_true(&self.predicate, &scope, ctx, "WHERE")? {
                kept.push(row);
            }
        }
        Ok(ResultSet::Query {
            columns,
            rows: kept,
        })
    }
}

/// Evaluates the SELECT list row by row
pub struct Projection<T: Transaction> {
    source: Box<dyn Executor<T>>,
    exprs: Vec<(Expression, ResultColumn)>,
}

impl<T: Transaction> Projection<T> {
    pub fn new(source: Box<dyn Executor<T>>, exprs: Vec<(Expression, ResultColumn)>) -> Box<Self> {
        Box::new(Self { source, exprs })
    }
}

impl<T: Transaction> Executor<T> for Projection<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (source_columns, rows) = self.source.execute(ctx, outer)?.into_query()?;
        let mut projected = Vec::with_capacity(rows.len());
        for row in &rows {
            let scope = Scope::new(&source_columns, row).with_outer(outer);
            projected.push(
                self.exprs
                    .iter()
                    .map(|(expr, _)| evaluate(expr, &scope, ctx))
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        let columns = self.exprs.into_iter().map(|(_, column)| column).collect();
        Ok(ResultSet::Query {
            columns: fill_types(columns, &projected),
            rows: projected,
        })
    }
}

/// Types columns whose type could not be inferred up front from their first
/// non-NULL value
pub(super) fn fill_types(mut columns: Vec<ResultColumn>, rows: &[Vec<Value>]) -> Vec<ResultColumn> {
    for (i, column) in columns.iter_mut().enumerate() {
        if column.datatype.is_none() {
            column.datatype = rows
                .iter()
                .filter_map(|row| row.get(i))
                .find_map(|value| value.datatype());
        }
    }
    columns
}

/// DISTINCT: keeps the first of each set of equal rows
pub struct Distinct<T: Transaction> {
    source: Box<dyn Executor<T>>,
}

impl<T: Transaction> Distinct<T> {
    pub fn new(source: Box<dyn Executor<T>>) -> Box<Self> {
        Box::new(Self { source })
    }
}

impl<T: Transaction> Executor<T> for Distinct<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (columns, rows) = self.source.execute(ctx, outer)?.into_query()?;
        let mut seen = BTreeSet::new();
        let rows = rows
            .into_iter()
            .filter(|row| seen.insert(RowKey(row.clone())))
            .collect();
        Ok(ResultSet::Query { columns, rows })
    }
}

/// ORDER BY executor - stable multi-key sort
pub struct Order<T: Transaction> {
    source: Box<dyn Executor<T>>,
    keys: Vec<OrderKey>,
}

impl<T: Transaction> Order<T> {
    pub fn new(source: Box<dyn Executor<T>>, keys: Vec<OrderKey>) -> Box<Self> {
        Box::new(Self { source, keys })
    }
}

impl<T: Transaction> Executor<T> for Order<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (columns, mut rows) = self.source.execute(ctx, outer)?.into_query()?;
        if let Some(key) = self.keys.iter().find(|k| k.index >= columns.len()) {
            return Err(Error::Internal(format!(
                "sort key {} is outside the {} projected columns",
                key.index,
                columns.len()
            )));
        }
        // Compare column by column: Equal moves on to the next key.
        rows.sort_by(|a, b| {
            for key in &self.keys {
                let (x, y) = (&a[key.index], &b[key.index]);
                let ordering = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) if key.nulls_first => Ordering::Less,
                    (true, false) => Ordering::Greater,
                    (false, true) if key.nulls_first => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => match key.direction {
                        OrderDirection::Asc => x.total_cmp(y),
                        OrderDirection::Desc => y.total_cmp(x),
                    },
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(ResultSet::Query { columns, rows })
    }
}

/// Evaluates a LIMIT/OFFSET count. NULL means no bound.
fn row_count<T: Transaction>(expr: &Expression, ctx: &Context<T>, clause: &str) -> Result<Option<usize>> {
    match evaluate(expr, &Scope::empty(), ctx)? {
        Value::Null => Ok(None),
        value => {
            let count = value.as_i64().ok_or_else(|| {
                Error::Execution(format!(
                    "argument of {} must be type bigint, not type {}",
                    clause,
                    value.type_name()
                ))
            })?;
            let count = usize::try_from(count).map_err(|_| {
                Error::Execution(format!("{} must not be negative", clause))
            })?;
            Ok(Some(count))
        }
    }
}

/// OFFSET executor - skips the first N rows
pub struct Offset<T: Transaction> {
    source: Box<dyn Executor<T>>,
    offset: Expression,
}

impl<T: Transaction> Offset<T> {
    pub fn new(source: Box<dyn Executor<T>>, offset: Expression) -> Box<Self> {
        Box::new(Self { source, offset })
    }
}

impl<T: Transaction> Executor<T> for Offset<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let offset = row_count(&self.offset, ctx, "OFFSET")?.unwrap_or(0);
        let (columns, rows) = self.source.execute(ctx, outer)?.into_query()?;
        Ok(ResultSet::Query {
            columns,
            rows: rows.into_iter().skip(offset).collect(),
        })
    }
}

/// LIMIT executor - restricts the number of rows returned
pub struct Limit<T: Transaction> {
    source: Box<dyn Executor<T>>,
    limit: Expression,
}

impl<T: Transaction> Limit<T> {
    pub fn new(source: Box<dyn Executor<T>>, limit: Expression) -> Box<Self> {
        Box::new(Self { source, limit })
    }
}

impl<T: Transaction> Executor<T> for Limit<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let limit = row_count(&self.limit, ctx, "LIMIT")?;
        let (columns, rows) = self.source.execute(ctx, outer)?.into_query()?;
        Ok(ResultSet::Query {
            columns,
            rows: match limit {
                Some(limit) => rows.into_iter().take(limit).collect(),
                None => rows,
            },
        })
    }
}

/// Drops the hidden sort columns once ordering is done
pub struct Truncate<T: Transaction> {
    source: Box<dyn Executor<T>>,
    width: usize,
}

impl<T: Transaction> Truncate<T> {
    pub fn new(source: Box<dyn Executor<T>>, width: usize) -> Box<Self> {
        Box::new(Self { source, width })
    }
}

impl<T: Transaction> Executor<T> for Truncate<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (mut columns, mut rows) = self.source.execute(ctx, outer)?.into_query()?;
        columns.truncate(self.width);
        for row in &mut rows {
            row.truncate(self.width);
        }
        Ok(ResultSet::Query { columns, rows })
    }
}
