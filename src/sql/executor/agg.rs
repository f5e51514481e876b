use std::collections::BTreeMap;

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        eval::{Scope, evaluate, is_true},
        parser::ast::Expression,
        types::{Tuple, Value},
    },
};

use super::{Context, Executor, ResultColumn, ResultSet, RowKey, query::fill_types};

/// Aggregate executor - groups the source rows and evaluates the output
/// expressions once per group. Aggregate calls inside them reduce over the
/// group's rows; plain column references read the group's first row.
pub struct Aggregate<T: Transaction> {
    source: Box<dyn Executor<T>>,
    group_by: Vec<Expression>,
    having: Option<Expression>,
    exprs: Vec<(Expression, ResultColumn)>,
}

impl<T: Transaction> Aggregate<T> {
    pub fn new(
        source: Box<dyn Executor<T>>,
        group_by: Vec<Expression>,
        having: Option<Expression>,
        exprs: Vec<(Expression, ResultColumn)>,
    ) -> Box<Self> {
        Box::new(Self {
            source,
            group_by,
            having,
            exprs,
        })
    }
}

impl<T: Transaction> Executor<T> for Aggregate<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let (columns, rows) = self.source.execute(ctx, outer)?.into_query()?;

        let mut groups: BTreeMap<RowKey, Vec<Tuple>> = BTreeMap::new();
        if self.group_by.is_empty() {
            // Without GROUP BY the whole input is one group, even when empty
            groups.insert(RowKey(Vec::new()), rows);
        } else {
            for row in rows {
                let scope = Scope::new(&columns, &row).with_outer(outer);
                let key = self
                    .group_by
                    .iter()
                    .map(|expr| evaluate(expr, &scope, ctx))
                    .collect::<Result<Vec<_>>>()?;
                groups.entry(RowKey(key)).or_default().push(row);
            }
        }

        let empty = vec![Value::Null; columns.len()];
        let mut output = Vec::with_capacity(groups.len());
        for group in groups.into_values() {
            let first = group.first().unwrap_or(&empty);
            let scope = Scope::new(&columns, first)
                .with_group(&group)
                .with_outer(outer);
            if let Some(having) = &self.having {
                if !is_true(having, &scope, ctx, "HAVING")? {
                    continue;
                }
            }
            output.push(
                self.exprs
                    .iter()
                    .map(|(expr, _)| evaluate(expr, &scope, ctx))
                    .collect::<Result<Vec<_>>>()?,
            );
        }

        let columns = self.exprs.into_iter().map(|(_, column)| column).collect();
        Ok(ResultSet::Query {
            columns: fill_types(columns, &output),
            rows: output,
        })
    }
}
