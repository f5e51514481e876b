use std::cmp::Ordering;

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        eval::{Scope, is_true},
        parser::ast::{Expression, JoinType},
        plan::join_columns,
        types::{Tuple, Value},
    },
};

use super::{Context, Executor, ResultColumn, ResultSet};

/// Nested loop join. Every left row is paired with every right row; the pair
/// is kept when the USING columns are equal and the ON predicate holds.
/// Outer joins pad the unmatched side with NULLs.
pub struct NestedLoopJoin<T: Transaction> {
    left: Box<dyn Executor<T>>,
    right: Box<dyn Executor<T>>,
    join_type: JoinType,
    condition: JoinCondition,
}

/// USING column pairs (left index, right index) plus the ON predicate
struct JoinCondition {
    predicate: Option<Expression>,
    using: Vec<(usize, usize)>,
}

impl<T: Transaction> NestedLoopJoin<T> {
    pub fn new(
        left: Box<dyn Executor<T>>,
        right: Box<dyn Executor<T>>,
        join_type: JoinType,
        predicate: Option<Expression>,
        using: Vec<(usize, usize)>,
    ) -> Box<Self> {
        Box::new(Self {
            left,
            right,
            join_type,
            condition: JoinCondition { predicate, using },
        })
    }
}

impl JoinCondition {
    fn matches<T: Transaction>(
        &self,
        columns: &[ResultColumn],
        left: &[Value],
        right: &[Value],
        ctx: &Context<T>,
        outer: Option<&Scope>,
    ) -> Result<bool> {
        for (l, r) in &self.using {
            if left[*l].compare(&right[*r])? != Some(Ordering::Equal) {
                return Ok(false);
            }
        }
        let Some(predicate) = &self.predicate else {
            return Ok(true);
        };
        let row: Tuple = left.iter().chain(right).cloned().collect();
        is_true(predicate, &Scope::new(columns, &row).with_outer(outer), ctx, "JOIN/ON")
    }

    /// Lays a joined pair out in output order: merged USING columns take the
    /// first non-NULL side
    fn combine(&self, left: Tuple, right: Tuple) -> Tuple {
        if self.using.is_empty() {
            let mut row = left;
            row.extend(right);
            return row;
        }
        let mut row: Tuple = self
            .using
            .iter()
            .map(|(l, r)| match &left[*l] {
                Value::Null => right[*r].clone(),
                value => value.clone(),
            })
            .collect();
        row.extend(
            left.into_iter()
                .enumerate()
                .filter(|(i, _)| !self.using.iter().any(|(l, _)| l == i))
                .map(|(_, v)| v),
        );
        row.extend(
            right
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !self.using.iter().any(|(_, r)| r == i))
                .map(|(_, v)| v),
        );
        row
    }
}

impl<T: Transaction> Executor<T> for NestedLoopJoin<T> {
    fn execute(self: Box<Self>, ctx: &Context<T>, outer: Option<&Scope>) -> Result<ResultSet> {
        let NestedLoopJoin {
            left,
            right,
            join_type,
            condition,
        } = *self;
        let (lcols, lrows) = left.execute(ctx, outer)?.into_query()?;
        let (rcols, rrows) = right.execute(ctx, outer)?.into_query()?;
        // The ON predicate sees both sides unmerged
        let raw: Vec<ResultColumn> = lcols.iter().chain(&rcols).cloned().collect();
        let columns = join_columns(&lcols, &rcols, &condition.using);

        let keep_left = matches!(join_type, JoinType::Left | JoinType::Full);
        let keep_right = matches!(join_type, JoinType::Right | JoinType::Full);
        let mut right_matched = vec![false; rrows.len()];
        let mut rows = Vec::new();

        for lrow in &lrows {
            let mut matched = false;
            for (i, rrow) in rrows.iter().enumerate() {
                if condition.matches(&raw, lrow, rrow, ctx, outer)? {
                    matched = true;
                    right_matched[i] = true;
                    rows.push(condition.combine(lrow.clone(), rrow.clone()));
                }
            }
            if keep_left && !matched {
                rows.push(condition.combine(lrow.clone(), vec![Value::Null; rcols.len()]));
            }
        }
        if keep_right {
            for (rrow, matched) in rrows.into_iter().zip(right_matched) {
                if !matched {
                    rows.push(condition.combine(vec![Value::Null; lcols.len()], rrow));
                }
            }
        }
        Ok(ResultSet::Query { columns, rows })
    }
}
