//! Normalized document model shared by both dialects.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::duration::format_duration;
use crate::quantity::Quantity;

/// JSON-compatible value with typed extensions for durations, timestamps and quantities.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Duration(Duration),
    Timestamp(DateTime<Utc>),
    Quantity(Quantity),
}

impl Value {
    pub fn from_json(v: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::String(s.clone()),
            J::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            J::Object(map) => Value::Map(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
            Value::String(s) => J::String(s.clone()),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => J::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Value::Duration(d) => J::String(format_duration(*d)),
            Value::Timestamp(t) => J::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Quantity(q) => J::String(q.as_str().to_string()),
        }
    }

    /// Short type name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Duration(_) => "duration",
            Value::Timestamp(_) => "timestamp",
            Value::Quantity(_) => "quantity",
        }
    }

    /// Type name as reported by jq's `type`.
    pub fn jq_type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) | Value::Duration(_) | Value::Timestamp(_) | Value::Quantity(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// jq truthiness: everything except `false` and `null`.
    pub fn is_truthy(&self) -> bool { !matches!(self, Value::Null | Value::Bool(false)) }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self { Value::Map(m) => m.get(key), _ => None }
    }

    /// Follow a chain of map keys.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |cur, key| cur.get(key))
    }

    /// Interpret as a timestamp: typed timestamps, or RFC 3339 strings.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Render for set-membership checks: strings as-is, bools as `true`/`false`,
    /// integral numbers in decimal, everything else as compact JSON.
    pub fn to_match_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
            Value::Float(f) => f.to_string(),
            Value::Null => "null".to_string(),
            Value::Duration(d) => format_duration(*d),
            Value::Timestamp(_) | Value::Quantity(_) => self.to_json().as_str().unwrap_or_default().to_string(),
            Value::List(_) | Value::Map(_) => self.to_json().to_string(),
        }
    }

    fn jq_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Int(_) | Value::Float(_) => 3,
            Value::String(_) | Value::Duration(_) | Value::Timestamp(_) | Value::Quantity(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
        }
    }

    /// jq's total order: null < false < true < numbers < strings < arrays < objects.
    pub fn jq_cmp(&self, other: &Value) -> Ordering {
        let (ra, rb) = (self.jq_rank(), other.jq_rank());
        if ra != rb { return ra.cmp(&rb); }
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let o = x.jq_cmp(y);
                    if o != Ordering::Equal { return o; }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                let ka: Vec<&String> = a.keys().collect();
                let kb: Vec<&String> = b.keys().collect();
                match ka.cmp(&kb) {
                    Ordering::Equal => {}
                    o => return o,
                }
                for (x, y) in a.values().zip(b.values()) {
                    let o = x.jq_cmp(y);
                    if o != Ordering::Equal { return o; }
                }
                Ordering::Equal
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => self.to_match_string().cmp(&other.to_match_string()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => self.as_f64() == other.as_f64(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Quantity(a), Value::Quantity(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self { Value::from_json(v) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self { Value::Float(f) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}
