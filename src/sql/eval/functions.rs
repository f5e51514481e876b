//! Scalar functions: a fixed set of built-ins plus whatever the host
//! registers by name.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::Context,
        types::{DataType, Value},
    },
};

/// A scalar function callable from SQL
pub type ScalarFunction = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Scalar functions by lower-cased name. Starts out holding the built-ins;
/// a host registration under an existing name replaces it.
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, ScalarFunction>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut functions: HashMap<String, ScalarFunction> = HashMap::new();
        let mut builtin = |name: &str, f: fn(&[Value]) -> Result<Value>| {
            functions.insert(name.to_string(), Arc::new(f));
        };
        builtin("gen_random_uuid", random_uuid);
        builtin("uuid_generate_v4", random_uuid);
        builtin("uuid_generate_v7", time_ordered_uuid);
        builtin("lower", lower);
        builtin("upper", upper);
        builtin("length", length);
        builtin("abs", abs);
        builtin("coalesce", coalesce);
        builtin("nullif", nullif);
        builtin("concat", concat);
        builtin("round", round);
        builtin("jsonb_typeof", jsonb_typeof);
        Self {
            functions: RwLock::new(functions),
        }
    }

    pub fn register(&self, name: &str, function: ScalarFunction) -> Result<()> {
        self.functions
            .write()?
            .insert(name.to_lowercase(), function);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<ScalarFunction>> {
        Ok(self.functions.read()?.get(name).cloned())
    }
}

/// Calls a function by name. Clock functions read the statement timestamp;
/// everything else goes through the registry. The registry lock is released
/// before the function runs.
pub fn call<T: Transaction>(name: &str, args: &[Value], ctx: &Context<T>) -> Result<Value> {
    let clock = match name {
        "now" | "current_timestamp" | "transaction_timestamp" => Some(Value::TimestampTz(ctx.now)),
        "localtimestamp" => Some(Value::Timestamp(ctx.now.naive_utc())),
        "current_date" => Some(Value::Date(ctx.now.date_naive())),
        "current_time" | "localtime" => Some(Value::Time(ctx.now.time())),
        _ => None,
    };
    if let Some(value) = clock {
        check_arity(name, args, 0, Some(0))?;
        return Ok(value);
    }
    match ctx.functions.get(name)? {
        Some(function) => function(args),
        None => Err(no_function(name, args)),
    }
}

fn check_arity(name: &str, args: &[Value], min: usize, max: Option<usize>) -> Result<()> {
    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        return Err(no_function(name, args));
    }
    Ok(())
}

fn no_function(name: &str, args: &[Value]) -> Error {
    let types: Vec<String> = args.iter().map(|a| a.type_name()).collect();
    Error::Execution(format!("function {}({}) does not exist", name, types.join(", ")))
}

fn random_uuid(args: &[Value]) -> Result<Value> {
    check_arity("gen_random_uuid", args, 0, Some(0))?;
    Ok(Value::Uuid(Uuid::new_v4()))
}

fn time_ordered_uuid(args: &[Value]) -> Result<Value> {
    check_arity("uuid_generate_v7", args, 0, Some(0))?;
    Ok(Value::Uuid(Uuid::now_v7()))
}

fn lower(args: &[Value]) -> Result<Value> {
    check_arity("lower", args, 1, Some(1))?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Text(s) => Ok(Value::Text(s.to_lowercase())),
        _ => Err(no_function("lower", args)),
    }
}

fn upper(args: &[Value]) -> Result<Value> {
    check_arity("upper", args, 1, Some(1))?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
        _ => Err(no_function("upper", args)),
    }
}

/// Characters of text, bytes of bytea
fn length(args: &[Value]) -> Result<Value> {
    check_arity("length", args, 1, Some(1))?;
    let len = match &args[0] {
        Value::Null => return Ok(Value::Null),
        Value::Text(s) => s.chars().count(),
        Value::Bytea(b) => b.len(),
        _ => return Err(no_function("length", args)),
    };
    Ok(Value::Integer(i32::try_from(len).map_err(|_| {
        Error::Execution("integer out of range".into())
    })?))
}

fn abs(args: &[Value]) -> Result<Value> {
    check_arity("abs", args, 1, Some(1))?;
    let range = |t: DataType| Error::Execution(format!("{} out of range", t));
    Ok(match &args[0] {
        Value::Null => Value::Null,
        Value::SmallInt(v) => Value::SmallInt(v.checked_abs().ok_or_else(|| range(DataType::SmallInt))?),
        Value::Integer(v) => Value::Integer(v.checked_abs().ok_or_else(|| range(DataType::Integer))?),
        Value::BigInt(v) => Value::BigInt(v.checked_abs().ok_or_else(|| range(DataType::BigInt))?),
        Value::Decimal(v) => Value::Decimal(v.abs()),
        Value::Real(v) => Value::Real(v.abs()),
        Value::Double(v) => Value::Double(v.abs()),
        _ => return Err(no_function("abs", args)),
    })
}

fn coalesce(args: &[Value]) -> Result<Value> {
    check_arity("coalesce", args, 1, None)?;
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

fn nullif(args: &[Value]) -> Result<Value> {
    check_arity("nullif", args, 2, Some(2))?;
    Ok(match args[0].compare(&args[1])? {
        Some(std::cmp::Ordering::Equal) => Value::Null,
        _ => args[0].clone(),
    })
}

/// Concatenates the printed form of every non-NULL argument
fn concat(args: &[Value]) -> Result<Value> {
    check_arity("concat", args, 1, None)?;
    Ok(Value::Text(
        args.iter()
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect(),
    ))
}

/// round(x [, places]): half away from zero. Negative places round to tens,
/// hundreds, ...
fn round(args: &[Value]) -> Result<Value> {
    check_arity("round", args, 1, Some(2))?;
    let places = match args.get(1) {
        None => 0,
        Some(Value::Null) => return Ok(Value::Null),
        Some(v) => v.as_i64().ok_or_else(|| no_function("round", args))?,
    };
    let places = i32::try_from(places).map_err(|_| no_function("round", args))?;
    Ok(match &args[0] {
        Value::Null => Value::Null,
        Value::Real(_) | Value::Double(_) => {
            let v = args[0].as_f64().unwrap_or(f64::NAN);
            let factor = 10f64.powi(places);
            Value::Double((v * factor).round() / factor)
        }
        v => {
            let d = v.as_decimal().ok_or_else(|| no_function("round", args))?;
            let rounded = round_decimal(d, places)?;
            match v.datatype() {
                Some(datatype) => datatype.convert_value(Value::Decimal(rounded))?,
                None => Value::Null,
            }
        }
    })
}

fn round_decimal(d: Decimal, places: i32) -> Result<Decimal> {
    if places >= 0 {
        return Ok(d.round_dp_with_strategy(places as u32, RoundingStrategy::MidpointAwayFromZero));
    }
    let overflow = || Error::Execution("numeric field overflow".into());
    let factor = 10i64
        .checked_pow(places.unsigned_abs())
        .map(Decimal::from)
        .ok_or_else(overflow)?;
    let scaled = d.checked_div(factor).ok_or_else(overflow)?;
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(factor)
        .ok_or_else(overflow)
}

fn jsonb_typeof(args: &[Value]) -> Result<Value> {
    check_arity("jsonb_typeof", args, 1, Some(1))?;
    let json = match &args[0] {
        Value::Null => return Ok(Value::Null),
        Value::Json(json) => json,
        _ => return Err(no_function("jsonb_typeof", args)),
    };
    Ok(Value::Text(
        match json {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
        .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::FunctionRegistry;
    use crate::{
        error::{Error, Result},
        sql::types::Value,
    };

    fn call(registry: &FunctionRegistry, name: &str, args: &[Value]) -> Result<Value> {
        match registry.get(name)? {
            Some(f) => f(args),
            None => Err(Error::Execution(format!("no function {}", name))),
        }
    }

    #[test]
    fn test_builtins() -> Result<()> {
        let registry = FunctionRegistry::new();
        assert_eq!(
            call(&registry, "upper", &[Value::Text("abc".into())])?,
            Value::Text("ABC".into())
        );
        assert_eq!(
            call(&registry, "length", &[Value::Text("héllo".into())])?,
            Value::Integer(5)
        );
        assert_eq!(
            call(&registry, "coalesce", &[Value::Null, Value::Integer(2)])?,
            Value::Integer(2)
        );
        assert_eq!(
            call(&registry, "nullif", &[Value::Integer(1), Value::Integer(1)])?,
            Value::Null
        );
        assert_eq!(
            call(
                &registry,
                "concat",
                &[Value::Text("a".into()), Value::Null, Value::Integer(1)]
            )?,
            Value::Text("a1".into())
        );
        assert_eq!(
            call(&registry, "round", &[Value::Decimal(Decimal::new(2345, 2)), Value::Integer(1)])?,
            Value::Decimal(Decimal::new(235, 1))
        );
        assert_eq!(
            call(&registry, "round", &[Value::Integer(1250), Value::Integer(-2)])?,
            Value::Integer(1300)
        );
        assert!(matches!(
            call(&registry, "gen_random_uuid", &[])?,
            Value::Uuid(u) if u.get_version_num() == 4
        ));
        assert!(call(&registry, "lower", &[Value::Integer(1)]).is_err());
        Ok(())
    }

    #[test]
    fn test_host_function_replaces_by_name() -> Result<()> {
        let registry = FunctionRegistry::new();
        registry.register(
            "Double_It",
            Arc::new(|args: &[Value]| match args {
                [Value::Integer(v)] => Ok(Value::Integer(v * 2)),
                _ => Err(Error::Execution("double_it takes one integer".into())),
            }),
        )?;
        assert_eq!(call(&registry, "double_it", &[Value::Integer(4)])?, Value::Integer(8));
        Ok(())
    }
}
