use std::cmp::Ordering;

use chrono::{NaiveTime, TimeDelta};
use regex::RegexBuilder;
use rust_decimal::Decimal;

use crate::{
    error::{Error, Result},
    sql::{
        parser::ast::{BinaryOperator, UnaryOperator},
        types::{DataType, Interval, Value},
    },
};

pub fn unary(op: UnaryOperator, value: Value) -> Result<Value> {
    Ok(match (op, value) {
        (_, Value::Null) => Value::Null,
        (UnaryOperator::Not, Value::Boolean(b)) => Value::Boolean(!b),
        (UnaryOperator::Plus, value) if value.is_numeric() || matches!(value, Value::Interval(_)) => value,
        (UnaryOperator::Minus, Value::SmallInt(v)) => {
            Value::SmallInt(v.checked_neg().ok_or_else(|| out_of_range(&DataType::SmallInt))?)
        }
        (UnaryOperator::Minus, Value::Integer(v)) => {
            Value::Integer(v.checked_neg().ok_or_else(|| out_of_range(&DataType::Integer))?)
        }
        (UnaryOperator::Minus, Value::BigInt(v)) => {
            Value::BigInt(v.checked_neg().ok_or_else(|| out_of_range(&DataType::BigInt))?)
        }
        (UnaryOperator::Minus, Value::Decimal(v)) => Value::Decimal(-v),
        (UnaryOperator::Minus, Value::Real(v)) => Value::Real(-v),
        (UnaryOperator::Minus, Value::Double(v)) => Value::Double(-v),
        (UnaryOperator::Minus, Value::Interval(v)) => {
            Value::Interval(v.checked_neg().ok_or_else(|| out_of_range(&DataType::Interval))?)
        }
        (op, value) => {
            let symbol = match op {
                UnaryOperator::Not => "NOT",
                UnaryOperator::Minus => "-",
                UnaryOperator::Plus => "+",
            };
            return Err(Error::Execution(format!(
                "operator does not exist: {} {}",
                symbol,
                value.type_name()
            )));
        }
    })
}

/// Applies a binary operator other than AND/OR to two evaluated operands
pub fn binary(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    use BinaryOperator::*;
    match op {
        Equal => compare(&lhs, &rhs, |o| o == Ordering::Equal),
        NotEqual => compare(&lhs, &rhs, |o| o != Ordering::Equal),
        LessThan => compare(&lhs, &rhs, |o| o == Ordering::Less),
        LessThanOrEqual => compare(&lhs, &rhs, |o| o != Ordering::Greater),
        GreaterThan => compare(&lhs, &rhs, |o| o == Ordering::Greater),
        GreaterThanOrEqual => compare(&lhs, &rhs, |o| o != Ordering::Less),
        Concat => concat(lhs, rhs),
        Contains => Ok(Value::Boolean(json_contains(&to_json(lhs)?, &to_json(rhs)?))),
        ContainedBy => Ok(Value::Boolean(json_contains(&to_json(rhs)?, &to_json(lhs)?))),
        JsonGet => Ok(match json_get(to_json(lhs)?, &rhs)? {
            Some(json) => Value::Json(json),
            None => Value::Null,
        }),
        JsonGetText => Ok(match json_get(to_json(lhs)?, &rhs)? {
            None | Some(serde_json::Value::Null) => Value::Null,
            Some(serde_json::Value::String(s)) => Value::Text(s),
            Some(json) => Value::Text(json.to_string()),
        }),
        Add | Subtract | Multiply | Divide | Remainder => arithmetic(op, lhs, rhs),
        And | Or => Err(Error::Internal(format!("{:?} is evaluated lazily", op))),
    }
}

fn compare(lhs: &Value, rhs: &Value, test: impl Fn(Ordering) -> bool) -> Result<Value> {
    Ok(match lhs.compare(rhs)? {
        Some(ordering) => Value::Boolean(test(ordering)),
        None => Value::Null,
    })
}

/// `||`: jsonb merge when either side is jsonb, byte concatenation for two
/// bytea values, otherwise text concatenation of the printed values
fn concat(lhs: Value, rhs: Value) -> Result<Value> {
    Ok(match (lhs, rhs) {
        (Value::Json(a), b) => Value::Json(json_concat(a, to_json(b)?)),
        (a, Value::Json(b)) => Value::Json(json_concat(to_json(a)?, b)),
        (Value::Bytea(mut a), Value::Bytea(b)) => {
            a.extend(b);
            Value::Bytea(a)
        }
        (a @ Value::Text(_), b) | (a, b @ Value::Text(_)) => Value::Text(format!("{}{}", a, b)),
        (a, b) => return Err(no_operator("||", &a, &b)),
    })
}

fn to_json(value: Value) -> Result<serde_json::Value> {
    match DataType::Jsonb.convert_value(value)? {
        Value::Json(json) => Ok(json),
        value => Err(Error::Internal(format!("expected jsonb, got {}", value.type_name()))),
    }
}

fn json_concat(lhs: serde_json::Value, rhs: serde_json::Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match (lhs, rhs) {
        (Json::Object(mut a), Json::Object(b)) => {
            a.extend(b);
            Json::Object(a)
        }
        (Json::Array(mut a), Json::Array(b)) => {
            a.extend(b);
            Json::Array(a)
        }
        (Json::Array(mut a), b) => {
            a.push(b);
            Json::Array(a)
        }
        (a, Json::Array(mut b)) => {
            b.insert(0, a);
            Json::Array(b)
        }
        (a, b) => Json::Array(vec![a, b]),
    }
}

/// jsonb `@>`: objects contain every key/value of the right side, arrays
/// contain every right element somewhere, scalars must be equal. A top-level
/// array also contains a bare scalar it holds.
fn json_contains(lhs: &serde_json::Value, rhs: &serde_json::Value) -> bool {
    use serde_json::Value as Json;
    match (lhs, rhs) {
        (Json::Object(a), Json::Object(b)) => b
            .iter()
            .all(|(key, value)| a.get(key).is_some_and(|inner| json_contains(inner, value))),
        (Json::Array(a), Json::Array(b)) => b
            .iter()
            .all(|needle| a.iter().any(|item| json_contains(item, needle))),
        (Json::Array(a), scalar) if !scalar.is_object() => a.iter().any(|item| item == scalar),
        (a, b) => a == b,
    }
}

/// `->` lookup by object key or by array index (negative counts from the
/// end). Missing entries are None.
fn json_get(json: serde_json::Value, key: &Value) -> Result<Option<serde_json::Value>> {
    use serde_json::Value as Json;
    Ok(match (json, key) {
        (Json::Object(mut object), Value::Text(key)) => object.remove(key),
        (Json::Array(mut array), key) if key.as_i64().is_some() => {
            let index = key.as_i64().unwrap_or_default();
            let len = array.len() as i64;
            let index = if index < 0 { len + index } else { index };
            if index < 0 || index >= len {
                None
            } else {
                Some(array.swap_remove(index as usize))
            }
        }
        (Json::Object(_) | Json::Array(_), _) => None,
        (_, key) if key.as_i64().is_some() || matches!(key, Value::Text(_)) => None,
        (_, key) => {
            return Err(Error::Execution(format!(
                "operator does not exist: jsonb -> {}",
                key.type_name()
            )));
        }
    })
}

/// `LIKE`/`ILIKE`: `%` matches any run of characters, `_` exactly one, and
/// `\` escapes the next character
pub fn like(value: Value, pattern: Value, case_insensitive: bool) -> Result<Value> {
    let (value, pattern) = match (value, pattern) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
        (Value::Text(value), Value::Text(pattern)) => (value, pattern),
        (value, pattern) => return Err(no_operator("LIKE", &value, &pattern)),
    };
    let mut regex = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => {
                    return Err(Error::Execution(
                        "LIKE pattern must not end with escape character".into(),
                    ));
                }
            },
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    let regex = RegexBuilder::new(&regex)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()?;
    Ok(Value::Boolean(regex.is_match(&value)))
}

fn arithmetic(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
    let (lhs, rhs) = coerce_untyped(op, lhs, rhs)?;
    if lhs.is_numeric() && rhs.is_numeric() {
        return numeric(op, &lhs, &rhs);
    }
    temporal(op, lhs, rhs)
}

/// Gives a text operand the type of the other side, the way an untyped
/// literal is resolved. Next to a date or time, text reads as an interval
/// when it parses as one.
fn coerce_untyped(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<(Value, Value)> {
    let temporal = |v: &Value| {
        matches!(
            v,
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::TimestampTz(_)
        )
    };
    let convert = |text: Value, other: &Value| -> Result<Value> {
        if let Value::Text(s) = &text {
            if temporal(other) && matches!(op, BinaryOperator::Add | BinaryOperator::Subtract) {
                if let Ok(interval) = Interval::parse(s) {
                    return Ok(Value::Interval(interval));
                }
            }
        }
        match other.datatype() {
            Some(datatype) => datatype.convert_value(text),
            None => Ok(text),
        }
    };
    Ok(match (lhs, rhs) {
        (lhs @ Value::Text(_), rhs @ Value::Text(_)) => (lhs, rhs),
        (lhs @ Value::Text(_), rhs) => (convert(lhs, &rhs)?, rhs),
        (lhs, rhs @ Value::Text(_)) => {
            let rhs = convert(rhs, &lhs)?;
            (lhs, rhs)
        }
        pair => pair,
    })
}

fn numeric(op: BinaryOperator, lhs: &Value, rhs: &Value) -> Result<Value> {
    use BinaryOperator::*;

    // Exact integers keep the wider operand type.
    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        let datatype = match (lhs, rhs) {
            (Value::BigInt(_), _) | (_, Value::BigInt(_)) => DataType::BigInt,
            (Value::Integer(_), _) | (_, Value::Integer(_)) => DataType::Integer,
            _ => DataType::SmallInt,
        };
        if matches!(op, Divide | Remainder) && b == 0 {
            return Err(division_by_zero());
        }
        let result = match op {
            Add => a.checked_add(b),
            Subtract => a.checked_sub(b),
            Multiply => a.checked_mul(b),
            Divide => a.checked_div(b),
            Remainder => a.checked_rem(b),
            _ => None,
        }
        .ok_or_else(|| out_of_range(&datatype))?;
        return Ok(match datatype {
            DataType::SmallInt => {
                Value::SmallInt(i16::try_from(result).map_err(|_| out_of_range(&datatype))?)
            }
            DataType::Integer => {
                Value::Integer(i32::try_from(result).map_err(|_| out_of_range(&datatype))?)
            }
            _ => Value::BigInt(result),
        });
    }

    let inexact = |v: &Value| matches!(v, Value::Real(_) | Value::Double(_));
    if inexact(lhs) || inexact(rhs) {
        let a = lhs.as_f64().unwrap_or(f64::NAN);
        let b = rhs.as_f64().unwrap_or(f64::NAN);
        if matches!(op, Divide | Remainder) && b == 0.0 {
            return Err(division_by_zero());
        }
        let result = match op {
            Add => a + b,
            Subtract => a - b,
            Multiply => a * b,
            Divide => a / b,
            Remainder => a % b,
            _ => f64::NAN,
        };
        if result.is_infinite() && a.is_finite() && b.is_finite() {
            return Err(Error::Execution("value out of range: overflow".into()));
        }
        return Ok(match (lhs, rhs) {
            (Value::Real(_), Value::Real(_)) => Value::Real(result as f32),
            _ => Value::Double(result),
        });
    }

    let (a, b) = match (lhs.as_decimal(), rhs.as_decimal()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(no_operator(symbol(op), lhs, rhs)),
    };
    if matches!(op, Divide | Remainder) && b.is_zero() {
        return Err(division_by_zero());
    }
    let result: Option<Decimal> = match op {
        Add => a.checked_add(b),
        Subtract => a.checked_sub(b),
        Multiply => a.checked_mul(b),
        Divide => a.checked_div(b),
        Remainder => a.checked_rem(b),
        _ => None,
    };
    Ok(Value::Decimal(result.ok_or_else(|| {
        Error::Execution("numeric field overflow".into())
    })?))
}

fn temporal(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
    use BinaryOperator::*;
    let overflow = || Error::Execution("date out of range".into());
    Ok(match (op, lhs, rhs) {
        (Add | Subtract, Value::Date(d), n) if n.as_i64().is_some() => {
            let days = n.as_i64().unwrap_or_default();
            let days = if op == Subtract { -days } else { days };
            let delta = TimeDelta::try_days(days).ok_or_else(overflow)?;
            Value::Date(d.checked_add_signed(delta).ok_or_else(overflow)?)
        }
        (Add, n, Value::Date(d)) if n.as_i64().is_some() => {
            let delta = TimeDelta::try_days(n.as_i64().unwrap_or_default()).ok_or_else(overflow)?;
            Value::Date(d.checked_add_signed(delta).ok_or_else(overflow)?)
        }
        (Subtract, Value::Date(a), Value::Date(b)) => {
            let days = a.signed_duration_since(b).num_days();
            Value::Integer(i32::try_from(days).map_err(|_| overflow())?)
        }
        (Add, Value::Date(d), Value::Time(t)) | (Add, Value::Time(t), Value::Date(d)) => {
            Value::Timestamp(d.and_time(t))
        }

        (Add | Subtract, Value::Date(d), Value::Interval(i)) => {
            Value::Timestamp(shift(i, op)?.add_to(d.and_time(NaiveTime::MIN))?)
        }
        (Add | Subtract, Value::Timestamp(ts), Value::Interval(i)) => {
            Value::Timestamp(shift(i, op)?.add_to(ts)?)
        }
        (Add | Subtract, Value::TimestampTz(ts), Value::Interval(i)) => {
            Value::TimestampTz(shift(i, op)?.add_to(ts.naive_utc())?.and_utc())
        }
        (Add, Value::Interval(i), Value::Date(d)) => {
            Value::Timestamp(i.add_to(d.and_time(NaiveTime::MIN))?)
        }
        (Add, Value::Interval(i), Value::Timestamp(ts)) => Value::Timestamp(i.add_to(ts)?),
        (Add, Value::Interval(i), Value::TimestampTz(ts)) => {
            Value::TimestampTz(i.add_to(ts.naive_utc())?.and_utc())
        }

        (Subtract, Value::Timestamp(a), Value::Timestamp(b)) => {
            Value::Interval(Interval::between(a, b)?)
        }
        (Subtract, Value::TimestampTz(a), Value::TimestampTz(b)) => {
            Value::Interval(Interval::between(a.naive_utc(), b.naive_utc())?)
        }
        (Subtract, Value::Time(a), Value::Time(b)) => {
            let micros = a.signed_duration_since(b).num_microseconds().unwrap_or_default();
            Value::Interval(Interval::new(0, 0, micros))
        }
        (Add | Subtract, Value::Time(t), Value::Interval(i)) => {
            let micros = shift(i, op)?.micros;
            Value::Time(t.overflowing_add_signed(TimeDelta::microseconds(micros)).0)
        }

        (Add | Subtract, Value::Interval(a), Value::Interval(b)) => Value::Interval(
            a.checked_add(&shift(b, op)?)
                .ok_or_else(|| Error::Execution("interval out of range".into()))?,
        ),
        (Multiply, Value::Interval(i), n) | (Multiply, n, Value::Interval(i))
            if n.as_i64().is_some() =>
        {
            Value::Interval(
                i.checked_mul(n.as_i64().unwrap_or_default())
                    .ok_or_else(|| Error::Execution("interval out of range".into()))?,
            )
        }

        (op, lhs, rhs) => return Err(no_operator(symbol(op), &lhs, &rhs)),
    })
}

/// The interval to add: negated for subtraction
fn shift(interval: Interval, op: BinaryOperator) -> Result<Interval> {
    if op == BinaryOperator::Subtract {
        interval
            .checked_neg()
            .ok_or_else(|| out_of_range(&DataType::Interval))
    } else {
        Ok(interval)
    }
}

fn symbol(op: BinaryOperator) -> &'static str {
    use BinaryOperator::*;
    match op {
        Or => "OR",
        And => "AND",
        Equal => "=",
        NotEqual => "<>",
        LessThan => "<",
        LessThanOrEqual => "<=",
        GreaterThan => ">",
        GreaterThanOrEqual => ">=",
        Concat => "||",
        Contains => "@>",
        ContainedBy => "<@",
        JsonGet => "->",
        JsonGetText => "->>",
        Add => "+",
        Subtract => "-",
        Multiply => "*",
        Divide => "/",
        Remainder => "%",
    }
}

fn no_operator(symbol: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::Execution(format!(
        "operator does not exist: {} {} {}",
        lhs.type_name(),
        symbol,
        rhs.type_name()
    ))
}

fn out_of_range(datatype: &DataType) -> Error {
    Error::Execution(format!("{} out of range", datatype))
}

fn division_by_zero() -> Error {
    Error::Execution("division by zero".into())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{binary, like, unary};
    use crate::{
        error::{Error, Result},
        sql::{
            parser::ast::{BinaryOperator, UnaryOperator},
            types::{Interval, Value},
        },
    };

    #[test]
    fn test_integer_arithmetic() -> Result<()> {
        assert_eq!(
            binary(BinaryOperator::Add, Value::SmallInt(1), Value::Integer(2))?,
            Value::Integer(3)
        );
        assert_eq!(
            binary(BinaryOperator::Divide, Value::Integer(7), Value::Integer(2))?,
            Value::Integer(3)
        );
        assert_eq!(
            binary(BinaryOperator::Add, Value::Integer(i32::MAX), Value::Integer(1)),
            Err(Error::Execution("integer out of range".into()))
        );
        assert_eq!(
            binary(BinaryOperator::Remainder, Value::BigInt(1), Value::BigInt(0)),
            Err(Error::Execution("division by zero".into()))
        );
        Ok(())
    }

    #[test]
    fn test_mixed_numeric() -> Result<()> {
        assert_eq!(
            binary(
                BinaryOperator::Multiply,
                Value::Integer(3),
                Value::Decimal(Decimal::new(15, 1))
            )?,
            Value::Decimal(Decimal::new(45, 1))
        );
        assert_eq!(
            binary(BinaryOperator::Add, Value::Double(0.5), Value::Integer(1))?,
            Value::Double(1.5)
        );
        // Untyped text takes the other operand's type
        assert_eq!(
            binary(BinaryOperator::Add, Value::Text("4".into()), Value::Integer(1))?,
            Value::Integer(5)
        );
        Ok(())
    }

    #[test]
    fn test_date_arithmetic() -> Result<()> {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(
            binary(BinaryOperator::Add, Value::Date(date(2024, 2, 28)), Value::Integer(2))?,
            Value::Date(date(2024, 3, 1))
        );
        assert_eq!(
            binary(
                BinaryOperator::Subtract,
                Value::Date(date(2024, 3, 1)),
                Value::Date(date(2024, 2, 1))
            )?,
            Value::Integer(29)
        );
        assert_eq!(
            binary(
                BinaryOperator::Add,
                Value::Date(date(2024, 1, 31)),
                Value::Text("1 month".into())
            )?,
            Value::Timestamp(date(2024, 2, 29).and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(
            binary(
                BinaryOperator::Multiply,
                Value::Interval(Interval::new(0, 1, 0)),
                Value::Integer(3)
            )?,
            Value::Interval(Interval::new(0, 3, 0))
        );

        let extreme = Value::Interval(Interval::new(0, i32::MIN, 0));
        assert_eq!(
            unary(UnaryOperator::Minus, extreme.clone()),
            Err(Error::Execution("interval out of range".into()))
        );
        assert_eq!(
            binary(BinaryOperator::Subtract, Value::Date(date(2024, 1, 1)), extreme),
            Err(Error::Execution("interval out of range".into()))
        );
        Ok(())
    }

    #[test]
    fn test_json_operators() -> Result<()> {
        let doc = Value::Json(json!({"a": {"b": [1, 2, 3]}, "s": "x"}));
        assert_eq!(
            binary(BinaryOperator::JsonGet, doc.clone(), Value::Text("a".into()))?,
            Value::Json(json!({"b": [1, 2, 3]}))
        );
        assert_eq!(
            binary(BinaryOperator::JsonGetText, doc.clone(), Value::Text("s".into()))?,
            Value::Text("x".into())
        );
        assert_eq!(
            binary(BinaryOperator::JsonGet, Value::Json(json!([1, 2])), Value::Integer(-1))?,
            Value::Json(json!(2))
        );
        assert_eq!(
            binary(BinaryOperator::JsonGet, doc.clone(), Value::Text("zz".into()))?,
            Value::Null
        );
        assert_eq!(
            binary(BinaryOperator::Contains, doc.clone(), Value::Text(r#"{"a": {"b": [2]}}"#.into()))?,
            Value::Boolean(true)
        );
        assert_eq!(
            binary(BinaryOperator::ContainedBy, Value::Json(json!({"s": "y"})), doc)?,
            Value::Boolean(false)
        );
        assert_eq!(
            binary(
                BinaryOperator::Concat,
                Value::Json(json!({"a": 1})),
                Value::Json(json!({"b": 2}))
            )?,
            Value::Json(json!({"a": 1, "b": 2}))
        );
        Ok(())
    }

    #[test]
    fn test_like_escapes() -> Result<()> {
        let text = |s: &str| Value::Text(s.into());
        assert_eq!(like(text("50%"), text("50\\%"), false)?, Value::Boolean(true));
        assert_eq!(like(text("500"), text("50\\%"), false)?, Value::Boolean(false));
        assert_eq!(like(text("a.c"), text("a.c"), false)?, Value::Boolean(true));
        assert_eq!(like(text("abc"), text("a.c"), false)?, Value::Boolean(false));
        assert_eq!(like(Value::Null, text("%"), false)?, Value::Null);
        Ok(())
    }
}
