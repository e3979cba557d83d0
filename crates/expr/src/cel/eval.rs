use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{library, BinOp, Expr, Macro};
use crate::{ExprError, Scope, Value};

pub(crate) struct Env<'a> {
    scope: Scope<'a>,
    vars: Vec<(String, Value)>,
}

fn no_overload(op: &str, l: &Value, r: &Value) -> ExprError {
    ExprError::eval(format!("no such overload: {} {} {}", l.kind_name(), op, r.kind_name()))
}

fn as_bool(v: Value, ctx: &str) -> Result<bool, ExprError> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::eval(format!("{} expects bool, got {}", ctx, other.kind_name()))),
    }
}

impl<'a> Env<'a> {
    pub(crate) fn new(scope: &Scope<'a>) -> Self {
        Self { scope: *scope, vars: Vec::new() }
    }

    fn lookup(&self, name: &str) -> Result<&Value, ExprError> {
        if let Some((_, v)) = self.vars.iter().rev().find(|(n, _)| n == name) {
            return Ok(v);
        }
        if name == "self" || self.scope.kind == Some(name) {
            return Ok(self.scope.document);
        }
        Err(ExprError::eval(format!("undeclared reference to '{}'", name)))
    }

    // Resolves identifier/selection chains by reference; `None` when `e` is not a path.
    fn path(&self, e: &Expr) -> Option<Result<&Value, ExprError>> {
        match e {
            Expr::Ident(name) => Some(self.lookup(name)),
            Expr::Select(target, field) => Some(self.path(target)?.and_then(|v| select(v, field))),
            _ => None,
        }
    }

    pub(crate) fn eval(&mut self, e: &Expr) -> Result<Value, ExprError> {
        if let Some(v) = self.path(e) {
            return v.cloned();
        }
        match e {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Ident(name) => self.lookup(name).cloned(),
            Expr::Select(target, field) => {
                let v = self.eval(target)?;
                select(&v, field).cloned()
            }
            Expr::Index(target, idx) => {
                let t = self.eval(target)?;
                let i = self.eval(idx)?;
                index(&t, &i)
            }
            Expr::Has(target, field) => {
                let t = match self.path(target) {
                    Some(v) => v?.clone(),
                    None => self.eval(target)?,
                };
                match t {
                    Value::Map(m) => Ok(Value::Bool(m.contains_key(field))),
                    other => Err(ExprError::eval(format!("has() does not support {}", other.kind_name()))),
                }
            }
            Expr::Call { target, name, args } => {
                let receiver = match target {
                    Some(t) => Some(self.eval(t)?),
                    None => None,
                };
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                library::call(&self.scope, name, receiver, args)
            }
            Expr::List(items) => Ok(Value::List(items.iter().map(|i| self.eval(i)).collect::<Result<_, _>>()?)),
            Expr::Map(entries) => {
                let mut m = BTreeMap::new();
                for (k, v) in entries {
                    let key = match self.eval(k)? {
                        Value::String(s) => s,
                        other if matches!(other, Value::Int(_) | Value::Bool(_)) => other.to_match_string(),
                        other => return Err(ExprError::eval(format!("unsupported map key type {}", other.kind_name()))),
                    };
                    m.insert(key, self.eval(v)?);
                }
                Ok(Value::Map(m))
            }
            Expr::Not(inner) => Ok(Value::Bool(!as_bool(self.eval(inner)?, "!")?)),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| ExprError::eval("integer overflow")),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Duration(d) => Ok(Value::Duration(-d)),
                other => Err(ExprError::eval(format!("no such overload: -{}", other.kind_name()))),
            },
            // CEL commutative logic: a definite answer on either side wins over an error.
            Expr::And(l, r) => {
                let lv = self.eval(l).and_then(|v| as_bool(v, "&&"));
                if let Ok(false) = lv {
                    return Ok(Value::Bool(false));
                }
                let rv = self.eval(r).and_then(|v| as_bool(v, "&&"));
                match (lv, rv) {
                    (_, Ok(false)) => Ok(Value::Bool(false)),
                    (Ok(true), Ok(true)) => Ok(Value::Bool(true)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                    _ => Ok(Value::Bool(false)),
                }
            }
            Expr::Or(l, r) => {
                let lv = self.eval(l).and_then(|v| as_bool(v, "||"));
                if let Ok(true) = lv {
                    return Ok(Value::Bool(true));
                }
                let rv = self.eval(r).and_then(|v| as_bool(v, "||"));
                match (lv, rv) {
                    (_, Ok(true)) => Ok(Value::Bool(true)),
                    (Ok(false), Ok(false)) => Ok(Value::Bool(false)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                    _ => Ok(Value::Bool(true)),
                }
            }
            Expr::Cond(cond, then, otherwise) => {
                if as_bool(self.eval(cond)?, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Binary(op, l, r) => {
                let lv = self.eval(l)?;
                let rv = self.eval(r)?;
                binary(*op, &lv, &rv)
            }
            Expr::Comprehension { kind, range, var, body } => {
                let items = match self.eval(range)? {
                    Value::List(items) => items,
                    Value::Map(m) => m.into_keys().map(Value::String).collect(),
                    other => return Err(ExprError::eval(format!("cannot iterate over {}", other.kind_name()))),
                };
                self.comprehension(*kind, items, var, body)
            }
        }
    }

    fn with_var<T>(&mut self, var: &str, value: Value, f: impl FnOnce(&mut Self) -> T) -> T {
        self.vars.push((var.to_string(), value));
        let out = f(self);
        self.vars.pop();
        out
    }

    fn comprehension(&mut self, kind: Macro, items: Vec<Value>, var: &str, body: &Expr) -> Result<Value, ExprError> {
        match kind {
            Macro::All | Macro::Exists => {
                let decisive = kind == Macro::Exists;
                let mut first_err = None;
                for item in items {
                    match self.with_var(var, item, |env| env.eval(body)).and_then(|v| as_bool(v, "predicate")) {
                        Ok(b) if b == decisive => return Ok(Value::Bool(decisive)),
                        Ok(_) => {}
                        Err(e) => { first_err.get_or_insert(e); }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(Value::Bool(!decisive)),
                }
            }
            Macro::ExistsOne => {
                let mut hits = 0usize;
                for item in items {
                    if as_bool(self.with_var(var, item, |env| env.eval(body))?, "predicate")? {
                        hits += 1;
                    }
                }
                Ok(Value::Bool(hits == 1))
            }
            Macro::Filter => {
                let mut kept = Vec::new();
                for item in items {
                    if as_bool(self.with_var(var, item.clone(), |env| env.eval(body))?, "predicate")? {
                        kept.push(item);
                    }
                }
                Ok(Value::List(kept))
            }
            Macro::Map => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(self.with_var(var, item, |env| env.eval(body))?);
                }
                Ok(Value::List(mapped))
            }
        }
    }
}

fn select<'v>(v: &'v Value, field: &str) -> Result<&'v Value, ExprError> {
    match v {
        Value::Map(m) => m.get(field).ok_or_else(|| ExprError::eval(format!("no such key: {}", field))),
        other => Err(ExprError::eval(format!("type '{}' does not support field selection", other.kind_name()))),
    }
}

fn index(t: &Value, i: &Value) -> Result<Value, ExprError> {
    match (t, i) {
        (Value::List(items), Value::Int(n)) => usize::try_from(*n)
            .ok()
            .and_then(|n| items.get(n))
            .cloned()
            .ok_or_else(|| ExprError::eval(format!("index out of bounds: {}", n))),
        (Value::List(_), Value::Float(f)) if f.fract() == 0.0 => index(t, &Value::Int(*f as i64)),
        (Value::Map(m), Value::String(k)) => m.get(k).cloned().ok_or_else(|| ExprError::eval(format!("no such key: {}", k))),
        (Value::Map(m), k @ (Value::Int(_) | Value::Bool(_))) => {
            let key = k.to_match_string();
            m.get(&key).cloned().ok_or_else(|| ExprError::eval(format!("no such key: {}", key)))
        }
        (t, i) => Err(no_overload("[]", t, i)),
    }
}

/// Pairs a timestamp with an RFC 3339 string by parsing the string.
fn coerce<'v>(l: &'v Value, r: &'v Value) -> (std::borrow::Cow<'v, Value>, std::borrow::Cow<'v, Value>) {
    use std::borrow::Cow;
    match (l, r) {
        (Value::Timestamp(_), Value::String(_)) => match r.as_timestamp() {
            Some(t) => (Cow::Borrowed(l), Cow::Owned(Value::Timestamp(t))),
            None => (Cow::Borrowed(l), Cow::Borrowed(r)),
        },
        (Value::String(_), Value::Timestamp(_)) => match l.as_timestamp() {
            Some(t) => (Cow::Owned(Value::Timestamp(t)), Cow::Borrowed(r)),
            None => (Cow::Borrowed(l), Cow::Borrowed(r)),
        },
        _ => (Cow::Borrowed(l), Cow::Borrowed(r)),
    }
}

fn compare(l: &Value, r: &Value) -> Result<Ordering, ExprError> {
    let ord = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            l.as_f64().zip(r.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
        (Value::Quantity(a), Value::Quantity(b)) => a.partial_cmp(b),
        (Value::Quantity(a), n) if n.as_f64().is_some() => a.as_f64().partial_cmp(&n.as_f64().unwrap_or_default()),
        (n, Value::Quantity(b)) if n.as_f64().is_some() => n.as_f64().unwrap_or_default().partial_cmp(&b.as_f64()),
        _ => return Err(no_overload("<=>", l, r)),
    };
    ord.ok_or_else(|| ExprError::eval("comparison with NaN"))
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ExprError> {
    let v = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div if b == 0 => return Err(ExprError::eval("division by zero")),
        BinOp::Div => a.checked_div(b),
        BinOp::Rem if b == 0 => return Err(ExprError::eval("modulus by zero")),
        BinOp::Rem => a.checked_rem(b),
        _ => None,
    };
    v.map(Value::Int).ok_or_else(|| ExprError::eval("integer overflow"))
}

pub(crate) fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    let (l, r) = coerce(l, r);
    let (l, r) = (l.as_ref(), r.as_ref());
    let sym = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Eq => return Ok(Value::Bool(l == r)),
        BinOp::Ne => return Ok(Value::Bool(l != r)),
        BinOp::Lt => return Ok(Value::Bool(compare(l, r)? == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(compare(l, r)? != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(compare(l, r)? == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(compare(l, r)? != Ordering::Less)),
        BinOp::In => {
            return match r {
                Value::List(items) => Ok(Value::Bool(items.iter().any(|i| i == l))),
                Value::Map(m) => match l {
                    Value::String(k) => Ok(Value::Bool(m.contains_key(k))),
                    other => Ok(Value::Bool(m.contains_key(&other.to_match_string()))),
                },
                _ => Err(no_overload("in", l, r)),
            }
        }
    };
    match (op, l, r) {
        (_, Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
        (BinOp::Rem, _, _) => Err(no_overload(sym, l, r)),
        (_, Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (l.as_f64().unwrap_or_default(), r.as_f64().unwrap_or_default());
            Ok(Value::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                _ => a / b,
            }))
        }
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        (BinOp::Add, Value::Timestamp(t), Value::Duration(d)) | (BinOp::Add, Value::Duration(d), Value::Timestamp(t)) => {
            t.checked_add_signed(*d).map(Value::Timestamp).ok_or_else(|| ExprError::eval("timestamp overflow"))
        }
        (BinOp::Sub, Value::Timestamp(t), Value::Duration(d)) => {
            t.checked_sub_signed(*d).map(Value::Timestamp).ok_or_else(|| ExprError::eval("timestamp overflow"))
        }
        (BinOp::Sub, Value::Timestamp(a), Value::Timestamp(b)) => Ok(Value::Duration(a.signed_duration_since(*b))),
        (BinOp::Add, Value::Duration(a), Value::Duration(b)) => {
            a.checked_add(b).map(Value::Duration).ok_or_else(|| ExprError::eval("duration overflow"))
        }
        (BinOp::Sub, Value::Duration(a), Value::Duration(b)) => {
            a.checked_sub(b).map(Value::Duration).ok_or_else(|| ExprError::eval("duration overflow"))
        }
        (BinOp::Add, Value::Quantity(a), Value::Quantity(b)) => Ok(Value::Quantity(crate::Quantity::from_f64(a.as_f64() + b.as_f64()))),
        (BinOp::Sub, Value::Quantity(a), Value::Quantity(b)) => Ok(Value::Quantity(crate::Quantity::from_f64(a.as_f64() - b.as_f64()))),
        _ => Err(no_overload(sym, l, r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn mixed_numbers_promote() {
        assert_eq!(binary(BinOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Int(3));
        assert!(binary(BinOp::Rem, &Value::Float(1.0), &Value::Int(2)).is_err());
    }

    #[test]
    fn durations_compare_and_add() {
        let a = Value::Duration(Duration::seconds(30));
        let b = Value::Duration(Duration::minutes(1));
        assert_eq!(binary(BinOp::Lt, &a, &b).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinOp::Add, &a, &a).unwrap(), b);
    }

    #[test]
    fn string_vs_timestamp_is_parsed() {
        let ts = Value::from("2024-01-01T00:00:00Z").as_timestamp().unwrap();
        let later = Value::Timestamp(ts + Duration::hours(1));
        assert_eq!(binary(BinOp::Gt, &later, &Value::from("2024-01-01T00:00:00Z")).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinOp::Eq, &Value::from("2024-01-01T00:00:00Z"), &Value::Timestamp(ts)).unwrap(), Value::Bool(true));
        assert!(binary(BinOp::Lt, &Value::from("a"), &Value::Int(1)).is_err());
    }
}
