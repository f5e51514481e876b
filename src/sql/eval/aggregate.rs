use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::{
    error::{Error, Result},
    sql::{
        parser::ast::AggregateFunction,
        types::{Interval, Value},
    },
};

/// Reduces the argument values of one group. NULL inputs are ignored; an
/// aggregate over no non-NULL input is NULL, except COUNT which is 0.
pub fn compute(func: AggregateFunction, values: Vec<Value>, distinct: bool) -> Result<Value> {
    let mut values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if distinct {
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
    }
    match func {
        AggregateFunction::Count => Ok(Value::BigInt(values.len() as i64)),
        AggregateFunction::Sum => sum(values),
        AggregateFunction::Avg => avg(values),
        AggregateFunction::Min => extreme(values, Ordering::Less),
        AggregateFunction::Max => extreme(values, Ordering::Greater),
    }
}

/// SUM: smallint/integer sum to bigint, bigint and numeric to numeric,
/// floats keep their width, intervals add up
fn sum(values: Vec<Value>) -> Result<Value> {
    let Some(first) = values.first() else {
        return Ok(Value::Null);
    };
    match first {
        Value::SmallInt(_) | Value::Integer(_) => {
            let mut total: i64 = 0;
            for value in &values {
                let v = value.as_i64().ok_or_else(|| mixed("sum", value))?;
                total = total
                    .checked_add(v)
                    .ok_or_else(|| Error::Execution("bigint out of range".into()))?;
            }
            Ok(Value::BigInt(total))
        }
        Value::BigInt(_) | Value::Decimal(_) => Ok(Value::Decimal(decimal_sum(&values)?)),
        Value::Real(_) => Ok(Value::Real(float_sum(&values)? as f32)),
        Value::Double(_) => Ok(Value::Double(float_sum(&values)?)),
        Value::Interval(_) => {
            let mut total = Interval::default();
            for value in &values {
                let Value::Interval(i) = value else {
                    return Err(mixed("sum", value));
                };
                total = total
                    .checked_add(i)
                    .ok_or_else(|| Error::Execution("interval out of range".into()))?;
            }
            Ok(Value::Interval(total))
        }
        value => Err(no_function("sum", value)),
    }
}

/// AVG: exact kinds average to numeric, floats to double precision
fn avg(values: Vec<Value>) -> Result<Value> {
    let Some(first) = values.first() else {
        return Ok(Value::Null);
    };
    let count = values.len();
    match first {
        Value::Real(_) | Value::Double(_) => Ok(Value::Double(float_sum(&values)? / count as f64)),
        value if value.as_decimal().is_some() => {
            let total = decimal_sum(&values)?;
            total
                .checked_div(Decimal::from(count))
                .map(Value::Decimal)
                .ok_or_else(|| Error::Execution("numeric field overflow".into()))
        }
        value => Err(no_function("avg", value)),
    }
}

fn extreme(values: Vec<Value>, wanted: Ordering) -> Result<Value> {
    let mut best: Option<Value> = None;
    for value in values {
        best = Some(match best {
            None => value,
            Some(current) => match value.compare(&current)? {
                Some(ordering) if ordering == wanted => value,
                _ => current,
            },
        });
    }
    Ok(best.unwrap_or(Value::Null))
}

fn decimal_sum(values: &[Value]) -> Result<Decimal> {
    values.iter().try_fold(Decimal::ZERO, |total, value| {
        let v = value.as_decimal().ok_or_else(|| mixed("sum", value))?;
        total
            .checked_add(v)
            .ok_or_else(|| Error::Execution("numeric field overflow".into()))
    })
}

fn float_sum(values: &[Value]) -> Result<f64> {
    values.iter().try_fold(0.0, |total, value| {
        Ok(total + value.as_f64().ok_or_else(|| mixed("sum", value))?)
    })
}

fn no_function(name: &str, value: &Value) -> Error {
    Error::Execution(format!("function {}({}) does not exist", name, value.type_name()))
}

fn mixed(name: &str, value: &Value) -> Error {
    Error::Execution(format!("{} cannot mix in a value of type {}", name, value.type_name()))
}
