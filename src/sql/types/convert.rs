//! Per-kind validation and coercion.
//!
//! `is_valid_value` answers whether a value is already in the canonical
//! in-memory form of a kind; `convert_value` coerces a compatible value
//! (numeric string, ISO date text, structured input, ...) into that form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use uuid::Uuid;

use super::{DataType, Interval, Value};
use crate::error::{Error, Result};

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

impl DataType {
    /// Is the value already a well-formed member of this kind? NULL is valid
    /// for every kind; nullability is a column concern.
    pub fn is_valid_value(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::SmallInt, Value::SmallInt(_))
            | (DataType::Integer, Value::Integer(_))
            | (DataType::BigInt, Value::BigInt(_))
            | (DataType::Real, Value::Real(_))
            | (DataType::Double, Value::Double(_))
            | (DataType::Boolean, Value::Boolean(_))
            | (DataType::Date, Value::Date(_))
            | (DataType::Time, Value::Time(_))
            | (DataType::Timestamp, Value::Timestamp(_))
            | (DataType::TimestampTz, Value::TimestampTz(_))
            | (DataType::Interval, Value::Interval(_))
            | (DataType::Uuid, Value::Uuid(_))
            | (DataType::Jsonb, Value::Json(_))
            | (DataType::Bytea, Value::Bytea(_)) => true,
            (DataType::Varchar | DataType::Char | DataType::Text, Value::Text(_)) => true,
            (DataType::Decimal { precision, scale }, Value::Decimal(d)) => {
                Self::fit_decimal(*d, *precision, *scale).is_ok_and(|fitted| fitted == *d)
            }
            _ => false,
        }
    }

    /// Coerces a value into this kind's canonical representation.
    pub fn convert_value(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let invalid = |value: &Value| {
            Error::Validation(format!(
                "invalid input for type {}: {} ({})",
                self,
                value,
                value.type_name()
            ))
        };
        Ok(match self {
            DataType::SmallInt => {
                let v = Self::to_integer(&value).ok_or_else(|| invalid(&value))??;
                Value::SmallInt(i16::try_from(v).map_err(|_| Self::out_of_range(self))?)
            }
            DataType::Integer => {
                let v = Self::to_integer(&value).ok_or_else(|| invalid(&value))??;
                Value::Integer(i32::try_from(v).map_err(|_| Self::out_of_range(self))?)
            }
            DataType::BigInt => {
                Value::BigInt(Self::to_integer(&value).ok_or_else(|| invalid(&value))??)
            }
            DataType::Decimal { precision, scale } => {
                let d = match &value {
                    Value::Text(s) => Self::parse_decimal(s.trim()).ok_or_else(|| invalid(&value))?,
                    Value::Real(_) | Value::Double(_) => {
                        Value::decimal_from_f64(value.as_f64().unwrap_or(f64::NAN))?
                    }
                    v => v.as_decimal().ok_or_else(|| invalid(&value))?,
                };
                Value::Decimal(Self::fit_decimal(d, *precision, *scale)?)
            }
            DataType::Real => Value::Real(Self::to_float(&value).ok_or_else(|| invalid(&value))? as f32),
            DataType::Double => Value::Double(Self::to_float(&value).ok_or_else(|| invalid(&value))?),
            DataType::Varchar | DataType::Char | DataType::Text => match value {
                Value::Text(s) => Value::Text(s),
                v => Value::Text(v.to_string()),
            },
            DataType::Boolean => match &value {
                Value::Boolean(b) => Value::Boolean(*b),
                Value::Text(s) => Value::Boolean(Self::parse_bool(s).ok_or_else(|| invalid(&value))?),
                _ => return Err(invalid(&value)),
            },
            DataType::Date => match value {
                Value::Date(d) => Value::Date(d),
                Value::Timestamp(ts) => Value::Date(ts.date()),
                Value::TimestampTz(ts) => Value::Date(ts.date_naive()),
                Value::Text(s) => Value::Date(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?),
                v => return Err(invalid(&v)),
            },
            DataType::Time => match value {
                Value::Time(t) => Value::Time(t),
                Value::Timestamp(ts) => Value::Time(ts.time()),
                Value::Text(s) => Value::Time(Self::parse_time(s.trim()).ok_or_else(|| {
                    Error::Validation(format!("invalid input syntax for type time: \"{}\"", s))
                })?),
                v => return Err(invalid(&v)),
            },
            DataType::Timestamp => match value {
                Value::Timestamp(ts) => Value::Timestamp(ts),
                Value::Date(d) => Value::Timestamp(d.and_time(NaiveTime::MIN)),
                Value::TimestampTz(ts) => Value::Timestamp(ts.naive_utc()),
                Value::Text(s) => Value::Timestamp(Self::parse_timestamp(s.trim()).ok_or_else(|| {
                    Error::Validation(format!("invalid input syntax for type timestamp: \"{}\"", s))
                })?),
                v => return Err(invalid(&v)),
            },
            DataType::TimestampTz => match value {
                Value::TimestampTz(ts) => Value::TimestampTz(ts),
                Value::Timestamp(ts) => Value::TimestampTz(ts.and_utc()),
                Value::Date(d) => Value::TimestampTz(d.and_time(NaiveTime::MIN).and_utc()),
                Value::Text(s) => Value::TimestampTz(Self::parse_timestamptz(s.trim()).ok_or_else(|| {
                    Error::Validation(format!(
                        "invalid input syntax for type timestamp with time zone: \"{}\"",
                        s
                    ))
                })?),
                v => return Err(invalid(&v)),
            },
            DataType::Interval => match value {
                Value::Interval(i) => Value::Interval(i),
                Value::Text(s) => Value::Interval(Interval::parse(&s)?),
                v => return Err(invalid(&v)),
            },
            DataType::Uuid => match value {
                Value::Uuid(u) => Value::Uuid(u),
                Value::Text(s) => Value::Uuid(Uuid::parse_str(s.trim())?),
                Value::Bytea(b) => Value::Uuid(Uuid::from_slice(&b)?),
                v => return Err(invalid(&v)),
            },
            DataType::Jsonb => Value::Json(Self::to_json(value)?),
            DataType::Bytea => match value {
                Value::Bytea(b) => Value::Bytea(b),
                Value::Text(s) => match s.strip_prefix("\\x") {
                    Some(digits) => Value::Bytea(hex::decode(digits).map_err(|e| {
                        Error::Validation(format!("invalid hexadecimal data: {}", e))
                    })?),
                    None => Value::Bytea(s.into_bytes()),
                },
                Value::Uuid(u) => Value::Bytea(u.as_bytes().to_vec()),
                v => return Err(invalid(&v)),
            },
        })
    }

    fn out_of_range(&self) -> Error {
        Error::Validation(format!("value out of range for type {}", self))
    }

    /// Integer coercion. The outer Option is "is this kind convertible at
    /// all", the inner Result reports bad input of a convertible kind.
    fn to_integer(value: &Value) -> Option<Result<i64>> {
        let range = || Error::Validation("integer out of range".to_string());
        Some(match value {
            v if v.as_i64().is_some() => Ok(v.as_i64()?),
            Value::Decimal(d) => d
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .ok_or_else(range),
            Value::Real(_) | Value::Double(_) => {
                let f = value.as_f64()?.round();
                if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f as i64)
                } else {
                    Err(range())
                }
            }
            Value::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                Error::Validation(format!("invalid input syntax for type integer: \"{}\"", s))
            }),
            _ => return None,
        })
    }

    fn to_float(value: &Value) -> Option<f64> {
        match value {
            Value::Text(s) => match s.trim().to_lowercase().as_str() {
                "nan" => Some(f64::NAN),
                "infinity" | "inf" => Some(f64::INFINITY),
                "-infinity" | "-inf" => Some(f64::NEG_INFINITY),
                t => t.parse().ok(),
            },
            v => v.as_f64(),
        }
    }

    fn parse_decimal(s: &str) -> Option<Decimal> {
        s.parse::<Decimal>()
            .ok()
            .or_else(|| Decimal::from_scientific(s).ok())
    }

    /// Rounds (and pads) to the declared scale and rejects values whose integer part
    /// does not fit in `precision - scale` digits.
    fn fit_decimal(d: Decimal, precision: Option<u32>, scale: Option<u32>) -> Result<Decimal> {
        let d = match scale {
            Some(s) => {
                let mut d = d.round_dp_with_strategy(s, RoundingStrategy::MidpointAwayFromZero);
                d.rescale(s);
                d
            }
            None => d,
        };
        if let Some(p) = precision {
            let int_digits = p.saturating_sub(scale.unwrap_or(0));
            if int_digits < 28 {
                let limit = Decimal::from(10i64.pow(int_digits.min(18)))
                    * Decimal::from(10i64.pow(int_digits.saturating_sub(18)));
                if d.abs() >= limit {
                    return Err(Error::Validation(format!(
                        "numeric field overflow: {} does not fit numeric({},{})",
                        d,
                        p,
                        scale.unwrap_or(0)
                    )));
                }
            }
        }
        Ok(d)
    }

    fn parse_bool(s: &str) -> Option<bool> {
        match s.trim().to_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
            "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    fn parse_time(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .ok()
    }

    fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
        TIMESTAMP_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.naive_local()))
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
    }

    /// Text with an explicit offset keeps it; text without one is UTC.
    fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .or_else(|| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").ok())
            .map(|ts| ts.with_timezone(&Utc))
            .or_else(|| Self::parse_timestamp(s).map(|ts| ts.and_utc()))
    }

    fn to_json(value: Value) -> Result<serde_json::Value> {
        Ok(match value {
            Value::Json(j) => j,
            Value::Text(s) => serde_json::from_str(&s)?,
            Value::Boolean(b) => serde_json::Value::Bool(b),
            Value::Decimal(d) => serde_json::from_str(&d.to_string())?,
            Value::Real(_) | Value::Double(_) => value
                .as_f64()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .ok_or_else(|| Error::Validation("cannot represent NaN/Infinity as jsonb".into()))?,
            v if v.as_i64().is_some() => serde_json::Value::from(v.as_i64().unwrap_or_default()),
            v => serde_json::Value::String(v.to_string()),
        })
    }
}
