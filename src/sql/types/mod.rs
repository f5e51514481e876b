use std::{cmp::Ordering, fmt::Display};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

mod convert;
mod interval;

pub use interval::Interval;

/// Supported SQL data types
///
/// Bounded text lengths live on the column, not on the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    SmallInt,
    Integer,
    BigInt,
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Real,
    Double,
    Varchar,
    Char,
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Jsonb,
    Bytea,
}

/// A type name resolved from its SQL spelling
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub datatype: DataType,
    /// Maximum length for varchar(n)/char(n)
    pub length: Option<u32>,
    /// serial/bigserial/smallserial
    pub serial: bool,
}

impl DataType {
    /// Resolves a (lower-cased, space-joined) SQL type name and its
    /// parenthesized arguments, applying the PostgreSQL aliases.
    pub fn from_name(name: &str, args: &[u32]) -> Option<TypeName> {
        let mut length = None;
        let mut serial = false;
        let datatype = match name {
            "smallint" | "int2" => DataType::SmallInt,
            "integer" | "int" | "int4" => DataType::Integer,
            "bigint" | "int8" => DataType::BigInt,
            "smallserial" | "serial2" => {
                serial = true;
                DataType::SmallInt
            }
            "serial" | "serial4" => {
                serial = true;
                DataType::Integer
            }
            "bigserial" | "serial8" => {
                serial = true;
                DataType::BigInt
            }
            "decimal" | "numeric" => DataType::Decimal {
                precision: args.first().copied(),
                scale: match args.len() {
                    0 => None,
                    1 => Some(0),
                    _ => Some(args[1]),
                },
            },
            "real" | "float4" => DataType::Real,
            "double precision" | "double" | "float8" | "float" => match args.first() {
                Some(p) if *p <= 24 => DataType::Real,
                _ => DataType::Double,
            },
            "varchar" | "character varying" => {
                length = args.first().copied();
                DataType::Varchar
            }
            "char" | "character" | "bpchar" => {
                length = Some(args.first().copied().unwrap_or(1));
                DataType::Char
            }
            "text" | "string" => DataType::Text,
            "boolean" | "bool" => DataType::Boolean,
            "date" => DataType::Date,
            "time" | "time without time zone" => DataType::Time,
            "timestamp" | "timestamp without time zone" => DataType::Timestamp,
            "timestamptz" | "timestamp with time zone" => DataType::TimestampTz,
            "interval" => DataType::Interval,
            "uuid" => DataType::Uuid,
            "jsonb" | "json" => DataType::Jsonb,
            "bytea" => DataType::Bytea,
            _ => return None,
        };
        // Only the parameterized types accept arguments.
        let takes_args = matches!(
            datatype,
            DataType::Decimal { .. } | DataType::Varchar | DataType::Char
        ) || name == "float";
        if !takes_args && !args.is_empty() {
            return None;
        }
        Some(TypeName {
            datatype,
            length,
            serial,
        })
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::SmallInt => f.write_str("smallint"),
            DataType::Integer => f.write_str("integer"),
            DataType::BigInt => f.write_str("bigint"),
            DataType::Decimal {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "numeric({},{})", p, s),
            DataType::Decimal { .. } => f.write_str("numeric"),
            DataType::Real => f.write_str("real"),
            DataType::Double => f.write_str("double precision"),
            DataType::Varchar => f.write_str("character varying"),
            DataType::Char => f.write_str("character"),
            DataType::Text => f.write_str("text"),
            DataType::Boolean => f.write_str("boolean"),
            DataType::Date => f.write_str("date"),
            DataType::Time => f.write_str("time"),
            DataType::Timestamp => f.write_str("timestamp"),
            DataType::TimestampTz => f.write_str("timestamptz"),
            DataType::Interval => f.write_str("interval"),
            DataType::Uuid => f.write_str("uuid"),
            DataType::Jsonb => f.write_str("jsonb"),
            DataType::Bytea => f.write_str("bytea"),
        }
    }
}

/// Runtime value
///
/// Values are immutable once built; textual kinds (varchar/char/text) all
/// share `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Decimal(#[serde(with = "text")] Decimal),
    Real(f32),
    Double(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(Interval),
    Uuid(Uuid),
    Json(#[serde(with = "text")] serde_json::Value),
    Bytea(#[serde(with = "serde_bytes")] Vec<u8>),
}

/// An ordered tuple of values (one result or candidate row)
pub type Tuple = Vec<Value>;

impl Value {
    /// Returns the data type of the value, or None if it's Null
    pub fn datatype(&self) -> Option<DataType> {
        Some(match self {
            Self::Null => return None,
            Self::Boolean(_) => DataType::Boolean,
            Self::SmallInt(_) => DataType::SmallInt,
            Self::Integer(_) => DataType::Integer,
            Self::BigInt(_) => DataType::BigInt,
            Self::Decimal(_) => DataType::Decimal {
                precision: None,
                scale: None,
            },
            Self::Real(_) => DataType::Real,
            Self::Double(_) => DataType::Double,
            Self::Text(_) => DataType::Text,
            Self::Date(_) => DataType::Date,
            Self::Time(_) => DataType::Time,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::TimestampTz(_) => DataType::TimestampTz,
            Self::Interval(_) => DataType::Interval,
            Self::Uuid(_) => DataType::Uuid,
            Self::Json(_) => DataType::Jsonb,
            Self::Bytea(_) => DataType::Bytea,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SmallInt(_)
                | Self::Integer(_)
                | Self::BigInt(_)
                | Self::Decimal(_)
                | Self::Real(_)
                | Self::Double(_)
        )
    }

    /// Integer kinds widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SmallInt(v) => Some(*v as i64),
            Self::Integer(v) => Some(*v as i64),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer and decimal kinds as an exact decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            v => v.as_i64().map(Decimal::from),
        }
    }

    /// Any numeric kind as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Decimal(d) => d.to_f64(),
            v => v.as_i64().map(|i| i as f64),
        }
    }

    /// Builds a decimal value from a float, failing on NaN/infinity
    pub fn decimal_from_f64(v: f64) -> Result<Decimal> {
        Decimal::from_f64(v)
            .ok_or_else(|| Error::Validation(format!("cannot represent {} as numeric", v)))
    }

    /// SQL comparison: None when either side is NULL.
    ///
    /// Numeric kinds compare across widths; a text value compared against a
    /// typed value is first converted to that type (the way an untyped string
    /// literal behaves in PostgreSQL).
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        Ok(Some(match (self, other) {
            (Self::Null, _) | (_, Self::Null) => return Ok(None),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
                a.as_i64().cmp(&b.as_i64())
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Self::compare_numeric(a, b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::TimestampTz(a), Self::TimestampTz(b)) => a.cmp(b),
            (Self::Date(a), Self::Timestamp(b)) => a.and_time(NaiveTime::MIN).cmp(b),
            (Self::Timestamp(a), Self::Date(b)) => a.cmp(&b.and_time(NaiveTime::MIN)),
            (Self::Timestamp(a), Self::TimestampTz(b)) => a.and_utc().cmp(b),
            (Self::TimestampTz(a), Self::Timestamp(b)) => a.cmp(&b.and_utc()),
            (Self::Interval(a), Self::Interval(b)) => a.total_micros().cmp(&b.total_micros()),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Bytea(a), Self::Bytea(b)) => a.cmp(b),
            (Self::Json(a), Self::Json(b)) => {
                if a == b {
                    Ordering::Equal
                } else {
                    a.to_string().cmp(&b.to_string())
                }
            }
            (Self::Text(s), b) => match b.datatype() {
                Some(dt) => return dt.convert_value(Value::Text(s.clone()))?.compare(b),
                None => return Ok(None),
            },
            (a, Self::Text(s)) => match a.datatype() {
                Some(dt) => return a.compare(&dt.convert_value(Value::Text(s.clone()))?),
                None => return Ok(None),
            },
            (a, b) => {
                return Err(Error::Execution(format!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                )));
            }
        }))
    }

    /// Mixed-width numeric comparison. Floats win over exact kinds.
    fn compare_numeric(a: &Value, b: &Value) -> Ordering {
        let inexact = |v: &Value| matches!(v, Self::Real(_) | Self::Double(_));
        if inexact(a) || inexact(b) {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        } else {
            a.as_decimal().cmp(&b.as_decimal())
        }
    }

    /// Total order used for sorting, grouping and DISTINCT.
    ///
    /// NULL sorts above every other value. Values that cannot be compared
    /// fall back to a fixed order of kinds.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Greater,
            (_, Self::Null) => Ordering::Less,
            (a, b) => match a.compare(b) {
                Ok(Some(ordering)) => ordering,
                _ => a.kind_rank().cmp(&b.kind_rank()),
            },
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Boolean(_) => 0,
            Self::SmallInt(_)
            | Self::Integer(_)
            | Self::BigInt(_)
            | Self::Decimal(_)
            | Self::Real(_)
            | Self::Double(_) => 1,
            Self::Text(_) => 2,
            Self::Date(_) | Self::Timestamp(_) | Self::TimestampTz(_) => 3,
            Self::Time(_) => 4,
            Self::Interval(_) => 5,
            Self::Uuid(_) => 6,
            Self::Json(_) => 7,
            Self::Bytea(_) => 8,
            Self::Null => 9,
        }
    }

    /// Name of the value's kind for error messages
    pub fn type_name(&self) -> String {
        match self.datatype() {
            Some(dt) => dt.to_string(),
            None => "unknown".to_string(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(true) => f.write_str("true"),
            Value::Boolean(false) => f.write_str("false"),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::TimestampTz(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f+00")),
            Value::Interval(v) => write!(f, "{}", v),
            Value::Uuid(v) => write!(f, "{}", v.hyphenated()),
            Value::Json(v) => write!(f, "{}", v),
            Value::Bytea(v) => write!(f, "\\x{}", hex::encode(v)),
        }
    }
}

/// Serializes a value through its canonical text form. Used for kinds whose
/// own serde representation is not self-describing-format agnostic.
mod text {
    use std::{fmt::Display, str::FromStr};

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<T: Display, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> std::result::Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use rust_decimal::Decimal;

    use super::{DataType, Value};
    use crate::error::Result;

    #[test]
    fn test_type_aliases() {
        let t = DataType::from_name("int4", &[]).unwrap();
        assert_eq!(t.datatype, DataType::Integer);
        assert!(!t.serial);

        let t = DataType::from_name("bigserial", &[]).unwrap();
        assert_eq!(t.datatype, DataType::BigInt);
        assert!(t.serial);

        let t = DataType::from_name("character varying", &[20]).unwrap();
        assert_eq!(t.datatype, DataType::Varchar);
        assert_eq!(t.length, Some(20));

        let t = DataType::from_name("numeric", &[10, 2]).unwrap();
        assert_eq!(
            t.datatype,
            DataType::Decimal {
                precision: Some(10),
                scale: Some(2)
            }
        );

        assert_eq!(
            DataType::from_name("double precision", &[]).unwrap().datatype,
            DataType::Double
        );
        assert!(DataType::from_name("integer", &[3]).is_none());
        assert!(DataType::from_name("blob", &[]).is_none());
    }

    #[test]
    fn test_compare_numeric_widths() -> Result<()> {
        assert_eq!(
            Value::SmallInt(3).compare(&Value::BigInt(3))?,
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Integer(1).compare(&Value::Decimal(Decimal::new(15, 1)))?,
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Double(2.5).compare(&Value::Integer(2))?,
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.compare(&Value::Null)?, None);
        Ok(())
    }

    #[test]
    fn test_compare_text_against_typed() -> Result<()> {
        let date = DataType::Date.convert_value(Value::Text("2024-03-01".into()))?;
        assert_eq!(
            date.compare(&Value::Text("2024-02-29".into()))?,
            Some(Ordering::Greater)
        );
        assert!(Value::Boolean(true).compare(&Value::Uuid(uuid::Uuid::nil())).is_err());
        Ok(())
    }

    #[test]
    fn test_total_cmp_nulls_high() {
        let mut values = vec![Value::Null, Value::Integer(2), Value::Integer(1)];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(2), Value::Null]);
    }

    #[test]
    fn test_snapshot_encoding_keeps_values() -> Result<()> {
        let row = vec![
            Value::Decimal(Decimal::new(12345, 2)),
            Value::Json(serde_json::json!({"a": [1, 2]})),
            Value::Bytea(vec![0, 1, 255]),
            Value::Uuid(uuid::Uuid::nil()),
            Value::Null,
        ];
        let bytes = bincode::serialize(&row)?;
        let decoded: Vec<Value> = bincode::deserialize(&bytes)?;
        assert_eq!(decoded, row);
        Ok(())
    }
}
