use chrono::{DateTime, TimeZone, Utc};

use crate::duration::parse_duration;
use crate::{ExprError, Quantity, Scope, Value};

fn overload(name: &str, args: &[Value]) -> ExprError {
    let kinds: Vec<&str> = args.iter().map(Value::kind_name).collect();
    ExprError::eval(format!("no such overload: {}({})", name, kinds.join(", ")))
}

fn timestamp_of(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Int(secs) => Utc.timestamp_opt(*secs, 0).single(),
        other => other.as_timestamp(),
    }
}

/// Dispatch a function call. Receiver-style calls (`x.f(a)`) see the receiver
/// as the first argument.
pub(crate) fn call(scope: &Scope<'_>, name: &str, receiver: Option<Value>, args: Vec<Value>) -> Result<Value, ExprError> {
    let args: Vec<Value> = receiver.into_iter().chain(args).collect();
    let v = match (name, args.as_slice()) {
        ("Now", []) => Value::Timestamp(scope.now),
        ("Rand", []) => Value::Float(scope.draw()),
        ("SinceSecond", [obj]) => {
            let created = obj
                .lookup(&["metadata", "creationTimestamp"])
                .and_then(Value::as_timestamp)
                .ok_or_else(|| ExprError::eval("SinceSecond: object has no metadata.creationTimestamp"))?;
            Value::Int(scope.now.signed_duration_since(created).num_seconds())
        }
        ("UnixSecond", [ts]) => match timestamp_of(ts) {
            Some(t) => Value::Int(t.timestamp()),
            None => return Err(overload(name, &args)),
        },
        ("Quantity", [Value::String(s)]) => {
            Value::Quantity(Quantity::parse(s).ok_or_else(|| ExprError::eval(format!("invalid quantity {:?}", s)))?)
        }
        ("Quantity", [Value::Int(i)]) => Value::Quantity(Quantity::from_f64(*i as f64)),
        ("Value", [Value::Quantity(q)]) => Value::Int(q.value()),
        ("MilliValue", [Value::Quantity(q)]) => Value::Int(q.milli_value()),

        ("size", [Value::String(s)]) => Value::Int(s.chars().count() as i64),
        ("size", [Value::List(items)]) => Value::Int(items.len() as i64),
        ("size", [Value::Map(m)]) => Value::Int(m.len() as i64),

        ("startsWith", [Value::String(s), Value::String(p)]) => Value::Bool(s.starts_with(p.as_str())),
        ("endsWith", [Value::String(s), Value::String(p)]) => Value::Bool(s.ends_with(p.as_str())),
        ("contains", [Value::String(s), Value::String(p)]) => Value::Bool(s.contains(p.as_str())),
        ("matches", [Value::String(s), Value::String(re)]) => {
            let re = regex::Regex::new(re).map_err(|e| ExprError::eval(format!("invalid regex: {}", e)))?;
            Value::Bool(re.is_match(s))
        }
        ("lowerAscii", [Value::String(s)]) => Value::String(s.to_ascii_lowercase()),
        ("upperAscii", [Value::String(s)]) => Value::String(s.to_ascii_uppercase()),

        ("dyn", [v]) => v.clone(),
        ("int", [Value::Int(i)]) => Value::Int(*i),
        ("int", [Value::Float(f)]) => {
            if !f.is_finite() || *f >= 9.223_372_036_854_776e18 || *f < -9.223_372_036_854_776e18 {
                return Err(ExprError::eval("int() range error"));
            }
            Value::Int(f.trunc() as i64)
        }
        ("int", [Value::String(s)]) => Value::Int(s.parse().map_err(|_| ExprError::eval(format!("int() cannot parse {:?}", s)))?),
        ("int", [Value::Timestamp(t)]) => Value::Int(t.timestamp()),
        ("int", [Value::Quantity(q)]) => Value::Int(q.value()),
        ("uint", [v]) => return call(scope, "int", None, vec![v.clone()]),
        ("double", [Value::Int(i)]) => Value::Float(*i as f64),
        ("double", [Value::Float(f)]) => Value::Float(*f),
        ("double", [Value::String(s)]) => {
            Value::Float(s.parse().map_err(|_| ExprError::eval(format!("double() cannot parse {:?}", s)))?)
        }
        ("double", [Value::Quantity(q)]) => Value::Float(q.as_f64()),
        ("string", [Value::String(s)]) => Value::String(s.clone()),
        ("string", [v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Duration(_) | Value::Timestamp(_) | Value::Quantity(_) | Value::Null)]) => {
            Value::String(v.to_match_string())
        }
        ("bool", [Value::Bool(b)]) => Value::Bool(*b),
        ("bool", [Value::String(s)]) => match s.as_str() {
            "true" | "True" | "TRUE" | "t" | "1" => Value::Bool(true),
            "false" | "False" | "FALSE" | "f" | "0" => Value::Bool(false),
            _ => return Err(ExprError::eval(format!("bool() cannot parse {:?}", s))),
        },
        ("duration", [Value::Duration(d)]) => Value::Duration(*d),
        ("duration", [Value::String(s)]) => {
            Value::Duration(parse_duration(s).ok_or_else(|| ExprError::eval(format!("invalid duration {:?}", s)))?)
        }
        ("timestamp", [v @ (Value::Timestamp(_) | Value::String(_) | Value::Int(_))]) => match timestamp_of(v) {
            Some(t) => Value::Timestamp(t),
            None => return Err(ExprError::eval(format!("invalid timestamp {:?}", v.to_match_string()))),
        },
        ("type", [v]) => Value::from(v.kind_name()),
        _ => return Err(overload(name, &args)),
    };
    Ok(v)
}
