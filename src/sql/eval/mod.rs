//! Expression evaluation.
//!
//! Expressions are evaluated directly from the AST against a [`Scope`]: the
//! current row with its column metadata, the row set of the current group
//! when aggregating, and the enclosing query's scope for correlated
//! subqueries. Logic is SQL three-valued; NULL propagates through operators
//! and comparisons, and only `IS [NOT] NULL` treats it as a value.

use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::{Context, ResultColumn, execute_select},
        parser::ast::{BinaryOperator, Expression, UnaryOperator},
        types::{Tuple, Value},
    },
};

mod aggregate;
mod functions;
mod ops;

pub use functions::{FunctionRegistry, ScalarFunction};

/// Column bindings visible to an expression
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub columns: &'a [ResultColumn],
    pub row: &'a [Value],
    /// Rows of the current group, set while evaluating grouped output
    pub group: Option<&'a [Tuple]>,
    /// Enclosing query, consulted when a name does not resolve here
    pub outer: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(columns: &'a [ResultColumn], row: &'a [Value]) -> Self {
        Self {
            columns,
            row,
            group: None,
            outer: None,
        }
    }

    /// A scope binding nothing, for constant expressions
    pub fn empty() -> Scope<'static> {
        Scope {
            columns: &[],
            row: &[],
            group: None,
            outer: None,
        }
    }

    pub fn with_outer(mut self, outer: Option<&'a Scope<'a>>) -> Self {
        self.outer = outer;
        self
    }

    pub fn with_group(mut self, group: &'a [Tuple]) -> Self {
        self.group = Some(group);
        self
    }

    /// Looks a column up here, then in the enclosing scopes
    pub fn lookup(&self, table: Option<&str>, name: &str) -> Result<&'a Value> {
        match resolve(self.columns, table, name)? {
            Some(index) => self.row.get(index).ok_or_else(|| {
                Error::Internal(format!("row has no value for column {}", name))
            }),
            None => match self.outer {
                Some(outer) => outer.lookup(table, name),
                None => Err(unknown_column(table, name)),
            },
        }
    }

    /// Whether a column reference resolves in this scope or an enclosing one
    pub fn binds(&self, table: Option<&str>, name: &str) -> Result<bool> {
        if resolve(self.columns, table, name)?.is_some() {
            return Ok(true);
        }
        match self.outer {
            Some(outer) => outer.binds(table, name),
            None => Ok(false),
        }
    }
}

/// Finds the position of a possibly qualified column name. Fails when the
/// name matches more than one column.
pub fn resolve(columns: &[ResultColumn], table: Option<&str>, name: &str) -> Result<Option<usize>> {
    let mut found = None;
    for (index, column) in columns.iter().enumerate() {
        if column.name != name {
            continue;
        }
        if table.is_some() && column.table.as_deref() != table {
            continue;
        }
        if found.is_some() {
            return Err(Error::Execution(format!(
                "column reference \"{}\" is ambiguous",
                name
            )));
        }
        found = Some(index);
    }
    Ok(found)
}

pub fn unknown_column(table: Option<&str>, name: &str) -> Error {
    match table {
        Some(table) => Error::Execution(format!("column {}.{} does not exist", table, name)),
        None => Error::Execution(format!("column \"{}\" does not exist", name)),
    }
}

/// Evaluates an expression in a scope
pub fn evaluate<T: Transaction>(expr: &Expression, scope: &Scope, ctx: &Context<T>) -> Result<Value> {
    Ok(match expr {
        Expression::Literal(value) => value.clone(),
        Expression::Column { table, name } => scope.lookup(table.as_deref(), name)?.clone(),

        Expression::Unary(UnaryOperator::Not, expr) => {
            match truth(evaluate(expr, scope, ctx)?, "NOT")? {
                Some(b) => Value::Boolean(!b),
                None => Value::Null,
            }
        }
        Expression::Unary(op, expr) => ops::unary(*op, evaluate(expr, scope, ctx)?)?,

        // AND/OR only evaluate their right side when the left does not
        // already decide the result.
        Expression::Binary(BinaryOperator::And, lhs, rhs) => {
            let lhs = truth(evaluate(lhs, scope, ctx)?, "AND")?;
            if lhs == Some(false) {
                return Ok(Value::Boolean(false));
            }
            match (lhs, truth(evaluate(rhs, scope, ctx)?, "AND")?) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            }
        }
        Expression::Binary(BinaryOperator::Or, lhs, rhs) => {
            let lhs = truth(evaluate(lhs, scope, ctx)?, "OR")?;
            if lhs == Some(true) {
                return Ok(Value::Boolean(true));
            }
            match (lhs, truth(evaluate(rhs, scope, ctx)?, "OR")?) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }
        }
        Expression::Binary(op, lhs, rhs) => {
            ops::binary(*op, evaluate(lhs, scope, ctx)?, evaluate(rhs, scope, ctx)?)?
        }

        Expression::IsNull { expr, negated } => {
            Value::Boolean(evaluate(expr, scope, ctx)?.is_null() != *negated)
        }

        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, scope, ctx)?;
            let candidates = list.iter().map(|item| evaluate(item, scope, ctx));
            negate_if(membership(&value, candidates)?, *negated)
        }
        Expression::InSubquery {
            expr,
            query,
            negated,
        } => {
            let value = evaluate(expr, scope, ctx)?;
            let (columns, rows) = execute_select(query, ctx, Some(scope))?;
            if columns.len() != 1 {
                return Err(Error::Execution("subquery has too many columns".into()));
            }
            let candidates = rows
                .into_iter()
                .map(|row| Ok(row.into_iter().next().unwrap_or(Value::Null)));
            negate_if(membership(&value, candidates)?, *negated)
        }

        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = evaluate(expr, scope, ctx)?;
            let low = evaluate(low, scope, ctx)?;
            let high = evaluate(high, scope, ctx)?;
            let above = value.compare(&low)?.map(|o| o != Ordering::Less);
            let below = value.compare(&high)?.map(|o| o != Ordering::Greater);
            let within = match (above, below) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            };
            negate_if(within, *negated)
        }

        Expression::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => {
            let matched = ops::like(
                evaluate(expr, scope, ctx)?,
                evaluate(pattern, scope, ctx)?,
                *case_insensitive,
            )?;
            negate_if(matched, *negated)
        }

        Expression::Case {
            operand,
            branches,
            else_result,
        } => {
            let operand = match operand {
                Some(operand) => Some(evaluate(operand, scope, ctx)?),
                None => None,
            };
            for (when, then) in branches {
                let when = evaluate(when, scope, ctx)?;
                let hit = match &operand {
                    Some(operand) => operand.compare(&when)? == Some(Ordering::Equal),
                    None => truth(when, "CASE")? == Some(true),
                };
                if hit {
                    return evaluate(then, scope, ctx);
                }
            }
            match else_result {
                Some(expr) => evaluate(expr, scope, ctx)?,
                None => Value::Null,
            }
        }

        Expression::Cast { expr, datatype } => datatype.convert_value(evaluate(expr, scope, ctx)?)?,

        Expression::Exists(query) => {
            let (_, rows) = execute_select(query, ctx, Some(scope))?;
            Value::Boolean(!rows.is_empty())
        }
        Expression::Subquery(query) => {
            let (columns, rows) = execute_select(query, ctx, Some(scope))?;
            if columns.len() != 1 {
                return Err(Error::Execution("subquery must return only one column".into()));
            }
            if rows.len() > 1 {
                return Err(Error::Execution(
                    "more than one row returned by a subquery used as an expression".into(),
                ));
            }
            rows.into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(Value::Null)
        }

        Expression::Function { name, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope, ctx))
                .collect::<Result<Vec<_>>>()?;
            functions::call(name, &args, ctx)?
        }

        Expression::Aggregate {
            func,
            arg,
            distinct,
        } => {
            let group = scope.group.ok_or_else(|| {
                Error::Execution(format!("aggregate function {} is not allowed here", func))
            })?;
            let values = match arg {
                // COUNT(*) counts rows, NULL or not
                None => vec![Value::Boolean(true); group.len()],
                Some(arg) => group
                    .iter()
                    .map(|row| {
                        let row_scope = Scope::new(scope.columns, row).with_outer(scope.outer);
                        evaluate(arg, &row_scope, ctx)
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            aggregate::compute(*func, values, *distinct)?
        }
    })
}

/// Evaluates a predicate: only TRUE passes, NULL and FALSE do not
pub fn is_true<T: Transaction>(
    expr: &Expression,
    scope: &Scope,
    ctx: &Context<T>,
    clause: &str,
) -> Result<bool> {
    Ok(truth(evaluate(expr, scope, ctx)?, clause)? == Some(true))
}

/// Reads a value as a boolean truth value, NULL being unknown
fn truth(value: Value, context: &str) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        Value::Text(ref s) => match s.trim().to_lowercase().as_str() {
            "t" | "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "f" | "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(not_boolean(&value, context)),
        },
        value => Err(not_boolean(&value, context)),
    }
}

fn not_boolean(value: &Value, context: &str) -> Error {
    Error::Execution(format!(
        "argument of {} must be type boolean, not type {}",
        context,
        value.type_name()
    ))
}

fn negate_if(value: Value, negated: bool) -> Value {
    match value {
        Value::Boolean(b) if negated => Value::Boolean(!b),
        value => value,
    }
}

/// `value IN (candidates)`: TRUE on a match, NULL when there is no match but
/// a NULL was involved, otherwise FALSE
fn membership(value: &Value, candidates: impl Iterator<Item = Result<Value>>) -> Result<Value> {
    let mut unknown = value.is_null();
    let mut empty = true;
    for candidate in candidates {
        empty = false;
        match value.compare(&candidate?)? {
            Some(Ordering::Equal) => return Ok(Value::Boolean(true)),
            Some(_) => {}
            None => unknown = true,
        }
    }
    if empty {
        return Ok(Value::Boolean(false));
    }
    Ok(if unknown {
        Value::Null
    } else {
        Value::Boolean(false)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::{FunctionRegistry, Scope, evaluate};
    use crate::{
        error::{Error, Result},
        sql::{
            executor::{Context, ResultColumn},
            parser::Parser,
            types::{DataType, Value},
        },
        storage::{IsolationLevel, MemoryStorage, TransactionManager, TriggerRegistry},
    };

    fn eval_in(sql: &str, columns: &[ResultColumn], row: &[Value]) -> Result<Value> {
        let mut storage = MemoryStorage::new();
        storage.create_schema("public")?;
        let manager = TransactionManager::new(
            Arc::new(Mutex::new(storage)),
            Arc::new(TriggerRegistry::new()),
        );
        let txn = manager.begin_implicit(IsolationLevel::default())?;
        let functions = FunctionRegistry::new();
        let ctx = Context {
            txn: &txn,
            functions: &functions,
            schema: "public",
            now: Utc::now(),
        };
        let expr = Parser::new(sql).parse_expression()?;
        evaluate(&expr, &Scope::new(columns, row), &ctx)
    }

    fn eval(sql: &str) -> Result<Value> {
        eval_in(sql, &[], &[])
    }

    #[test]
    fn test_null_semantics() -> Result<()> {
        assert_eq!(eval("NULL = NULL")?, Value::Null);
        assert_eq!(eval("NULL IS NULL")?, Value::Boolean(true));
        assert_eq!(eval("(1 + NULL) IS NOT NULL")?, Value::Boolean(false));
        assert_eq!(eval("NULL AND false")?, Value::Boolean(false));
        assert_eq!(eval("NULL AND true")?, Value::Null);
        assert_eq!(eval("NULL OR true")?, Value::Boolean(true));
        assert_eq!(eval("NOT NULL")?, Value::Null);
        assert_eq!(eval("1 IN (2, NULL)")?, Value::Null);
        assert_eq!(eval("1 IN (1, NULL)")?, Value::Boolean(true));
        assert_eq!(eval("1 NOT IN (2, 3)")?, Value::Boolean(true));
        Ok(())
    }

    #[test]
    fn test_short_circuit() -> Result<()> {
        // The right side would fail with a division by zero
        assert_eq!(eval("false AND 1 / 0 = 1")?, Value::Boolean(false));
        assert_eq!(eval("true OR 1 / 0 = 1")?, Value::Boolean(true));
        assert!(eval("true AND 1 / 0 = 1").is_err());
        Ok(())
    }

    #[test]
    fn test_between_like_case() -> Result<()> {
        assert_eq!(eval("5 BETWEEN 1 AND 10")?, Value::Boolean(true));
        assert_eq!(eval("5 NOT BETWEEN 1 AND 4")?, Value::Boolean(true));
        assert_eq!(eval("'hello' LIKE 'h%o'")?, Value::Boolean(true));
        assert_eq!(eval("'Hello' LIKE 'h%'")?, Value::Boolean(false));
        assert_eq!(eval("'Hello' ILIKE 'h_llo'")?, Value::Boolean(true));
        assert_eq!(
            eval("CASE WHEN 1 = 2 THEN 'a' WHEN 2 = 2 THEN 'b' ELSE 'c' END")?,
            Value::Text("b".into())
        );
        assert_eq!(eval("CASE 3 WHEN 1 THEN 'one' END")?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_columns_and_casts() -> Result<()> {
        let columns = vec![
            ResultColumn::new(Some("t"), "a", Some(DataType::Integer)),
            ResultColumn::new(Some("t"), "b", Some(DataType::Text)),
        ];
        let row = vec![Value::Integer(7), Value::Text("x".into())];
        assert_eq!(eval_in("t.a * 2", &columns, &row)?, Value::Integer(14));
        assert_eq!(eval_in("b || a", &columns, &row)?, Value::Text("x7".into()));
        assert_eq!(eval_in("a::text", &columns, &row)?, Value::Text("7".into()));
        assert_eq!(
            eval_in("c", &columns, &row),
            Err(Error::Execution("column \"c\" does not exist".into()))
        );
        Ok(())
    }

    #[test]
    fn test_aggregate_outside_group_fails() {
        assert!(matches!(eval("count(*)"), Err(Error::Execution(_))));
    }
}
