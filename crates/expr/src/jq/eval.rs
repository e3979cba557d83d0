use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{Ast, BinOp, Builtin, ObjKey};
use crate::{ExprError, Scope, Value};

type Out = Vec<Value>;

fn collect(ast: &Ast, input: &Value, scope: &Scope<'_>) -> Result<Out, ExprError> {
    let mut out = Vec::new();
    eval(ast, input, scope, &mut out)?;
    Ok(out)
}

pub(crate) fn eval(ast: &Ast, input: &Value, scope: &Scope<'_>, out: &mut Out) -> Result<(), ExprError> {
    match ast {
        Ast::Identity => out.push(input.clone()),
        Ast::Recurse => recurse(input, out),
        Ast::Literal(v) => out.push(v.clone()),
        Ast::Field(target, name) => {
            for v in collect(target, input, scope)? {
                out.push(field(&v, name)?);
            }
        }
        Ast::Index(target, index) => {
            let targets = collect(target, input, scope)?;
            for idx in collect(index, input, scope)? {
                for t in &targets {
                    out.push(index_value(t, &idx)?);
                }
            }
        }
        Ast::Slice(target, from, to) => {
            let from = match from { Some(f) => collect(f, input, scope)?, None => vec![Value::Null] };
            let to = match to { Some(t) => collect(t, input, scope)?, None => vec![Value::Null] };
            for t in collect(target, input, scope)? {
                for f in &from {
                    for e in &to {
                        out.push(slice(&t, f, e)?);
                    }
                }
            }
        }
        Ast::Iterate(target) => {
            for t in collect(target, input, scope)? {
                match t {
                    Value::List(items) => out.extend(items),
                    Value::Map(m) => out.extend(m.into_values()),
                    other => return Err(ExprError::eval(format!("Cannot iterate over {}", other.jq_type_name()))),
                }
            }
        }
        // Keeps whatever was produced before the error.
        Ast::Try(inner) => {
            let _ = eval(inner, input, scope, out);
        }
        Ast::Pipe(lhs, rhs) => {
            for v in collect(lhs, input, scope)? {
                eval(rhs, &v, scope, out)?;
            }
        }
        Ast::Comma(lhs, rhs) => {
            eval(lhs, input, scope, out)?;
            eval(rhs, input, scope, out)?;
        }
        Ast::Alt(lhs, rhs) => {
            let mut left = Vec::new();
            let _ = eval(lhs, input, scope, &mut left);
            left.retain(Value::is_truthy);
            if left.is_empty() {
                eval(rhs, input, scope, out)?;
            } else {
                out.extend(left);
            }
        }
        Ast::And(lhs, rhs) => {
            for l in collect(lhs, input, scope)? {
                if !l.is_truthy() {
                    out.push(Value::Bool(false));
                    continue;
                }
                for r in collect(rhs, input, scope)? {
                    out.push(Value::Bool(r.is_truthy()));
                }
            }
        }
        Ast::Or(lhs, rhs) => {
            for l in collect(lhs, input, scope)? {
                if l.is_truthy() {
                    out.push(Value::Bool(true));
                    continue;
                }
                for r in collect(rhs, input, scope)? {
                    out.push(Value::Bool(r.is_truthy()));
                }
            }
        }
        Ast::Binary(op, lhs, rhs) => {
            let rights = collect(rhs, input, scope)?;
            let lefts = collect(lhs, input, scope)?;
            for r in &rights {
                for l in &lefts {
                    out.push(binary(*op, l, r)?);
                }
            }
        }
        Ast::Neg(inner) => {
            for v in collect(inner, input, scope)? {
                out.push(match v {
                    Value::Int(i) => i.checked_neg().map(Value::Int).unwrap_or(Value::Float(-(i as f64))),
                    Value::Float(f) => Value::Float(-f),
                    other => return Err(ExprError::eval(format!("{} cannot be negated", other.jq_type_name()))),
                });
            }
        }
        Ast::If(cond, then, otherwise) => {
            for c in collect(cond, input, scope)? {
                match (c.is_truthy(), otherwise) {
                    (true, _) => eval(then, input, scope, out)?,
                    (false, Some(e)) => eval(e, input, scope, out)?,
                    (false, None) => out.push(input.clone()),
                }
            }
        }
        Ast::Array(inner) => {
            let items = match inner { Some(i) => collect(i, input, scope)?, None => Vec::new() };
            out.push(Value::List(items));
        }
        Ast::Object(entries) => {
            let mut partials = vec![BTreeMap::new()];
            for (key, value) in entries {
                let keys = match key {
                    ObjKey::Static(k) => vec![k.clone()],
                    ObjKey::Dynamic(k) => collect(k, input, scope)?
                        .into_iter()
                        .map(|k| match k {
                            Value::String(s) => Ok(s),
                            other => Err(ExprError::eval(format!("Object keys must be strings, got {}", other.jq_type_name()))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                };
                let values = collect(value, input, scope)?;
                let mut next = Vec::with_capacity(partials.len() * keys.len() * values.len());
                for p in &partials {
                    for k in &keys {
                        for v in &values {
                            let mut m = p.clone();
                            m.insert(k.clone(), v.clone());
                            next.push(m);
                        }
                    }
                }
                partials = next;
            }
            out.extend(partials.into_iter().map(Value::Map));
        }
        Ast::Call(b, args) => call(*b, args, input, scope, out)?,
    }
    Ok(())
}

fn recurse(v: &Value, out: &mut Out) {
    out.push(v.clone());
    match v {
        Value::List(items) => items.iter().for_each(|i| recurse(i, out)),
        Value::Map(m) => m.values().for_each(|i| recurse(i, out)),
        _ => {}
    }
}

fn field(v: &Value, name: &str) -> Result<Value, ExprError> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Map(m) => Ok(m.get(name).cloned().unwrap_or(Value::Null)),
        other => Err(ExprError::eval(format!("Cannot index {} with \"{}\"", other.jq_type_name(), name))),
    }
}

fn index_value(target: &Value, idx: &Value) -> Result<Value, ExprError> {
    match (target, idx) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Map(_), Value::String(k)) => field(target, k),
        (Value::List(items), n) if n.as_f64().is_some() => {
            let i = n.as_f64().unwrap_or_default().floor() as i64;
            let i = if i < 0 { items.len() as i64 + i } else { i };
            Ok(usize::try_from(i).ok().and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null))
        }
        (t, i) => Err(ExprError::eval(format!("Cannot index {} with {}", t.jq_type_name(), i.jq_type_name()))),
    }
}

fn slice_bounds(len: usize, from: &Value, to: &Value) -> Result<(usize, usize), ExprError> {
    let clamp = |v: &Value, default: usize| -> Result<usize, ExprError> {
        match v {
            Value::Null => Ok(default),
            n => {
                let n = n.as_f64().ok_or_else(|| ExprError::eval("Start and end indices of a slice must be numbers"))?;
                let n = n.floor() as i64;
                let n = if n < 0 { len as i64 + n } else { n };
                Ok(n.clamp(0, len as i64) as usize)
            }
        }
    };
    let (a, b) = (clamp(from, 0)?, clamp(to, len)?);
    Ok((a, b.max(a)))
}

fn slice(target: &Value, from: &Value, to: &Value) -> Result<Value, ExprError> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::List(items) => {
            let (a, b) = slice_bounds(items.len(), from, to)?;
            Ok(Value::List(items[a..b].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (a, b) = slice_bounds(chars.len(), from, to)?;
            Ok(Value::String(chars[a..b].iter().collect()))
        }
        other => Err(ExprError::eval(format!("Cannot index {} with object", other.jq_type_name()))),
    }
}

fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 { Value::Int(f as i64) } else { Value::Float(f) }
}

fn arith_err(op: &str, l: &Value, r: &Value) -> ExprError {
    ExprError::eval(format!("{} and {} cannot be {}", l.jq_type_name(), r.jq_type_name(), op))
}

pub(crate) fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(l == r)),
        BinOp::Ne => return Ok(Value::Bool(l != r)),
        BinOp::Lt => return Ok(Value::Bool(l.jq_cmp(r) == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(l.jq_cmp(r) != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(l.jq_cmp(r) == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(l.jq_cmp(r) != Ordering::Less)),
        _ => {}
    }
    match (op, l, r) {
        (BinOp::Add, Value::Null, x) | (BinOp::Add, x, Value::Null) => Ok(x.clone()),
        (BinOp::Add, Value::Int(a), Value::Int(b)) => Ok(a.checked_add(*b).map(Value::Int).unwrap_or(Value::Float(*a as f64 + *b as f64))),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => Ok(a.checked_sub(*b).map(Value::Int).unwrap_or(Value::Float(*a as f64 - *b as f64))),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => Ok(a.checked_mul(*b).map(Value::Int).unwrap_or(Value::Float(*a as f64 * *b as f64))),
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b.iter()).cloned().collect())),
        (BinOp::Add, Value::Map(a), Value::Map(b)) => {
            let mut m = a.clone();
            m.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Map(m))
        }
        (BinOp::Sub, Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().filter(|x| !b.contains(x)).cloned().collect())),
        (BinOp::Mul, Value::Map(a), Value::Map(b)) => Ok(Value::Map(deep_merge(a, b))),
        (BinOp::Div, Value::String(a), Value::String(b)) => Ok(split(a, b)),
        (BinOp::Rem, a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
            let (a, b) = (a.as_f64().unwrap_or_default() as i64, b.as_f64().unwrap_or_default() as i64);
            if b == 0 {
                return Err(ExprError::eval(format!("{} and {} cannot be divided because the divisor is zero", a, b)));
            }
            // |i64::MIN| only fits unsigned
            Ok(Value::Int((i128::from(a) % i128::from(b.unsigned_abs())) as i64))
        }
        (_, a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => match op {
                BinOp::Add => Ok(number(x + y)),
                BinOp::Sub => Ok(number(x - y)),
                BinOp::Mul => Ok(number(x * y)),
                BinOp::Div if y == 0.0 => Err(ExprError::eval(format!("{} and {} cannot be divided because the divisor is zero", x, y))),
                BinOp::Div => Ok(number(x / y)),
                _ => Err(arith_err("combined", a, b)),
            },
            _ => Err(arith_err(
                match op {
                    BinOp::Add => "added",
                    BinOp::Sub => "subtracted",
                    BinOp::Mul => "multiplied",
                    _ => "divided",
                },
                a,
                b,
            )),
        },
    }
}

fn deep_merge(a: &BTreeMap<String, Value>, b: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut m = a.clone();
    for (k, v) in b {
        let merged = match (m.get(k), v) {
            (Some(Value::Map(x)), Value::Map(y)) => Value::Map(deep_merge(x, y)),
            _ => v.clone(),
        };
        m.insert(k.clone(), merged);
    }
    m
}

fn split(s: &str, sep: &str) -> Value {
    if s.is_empty() {
        return Value::List(Vec::new());
    }
    Value::List(s.split(sep).map(Value::from).collect())
}

fn contains(a: &Value, b: &Value) -> Result<bool, ExprError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.contains(y.as_str())),
        (Value::List(xs), Value::List(ys)) => {
            for y in ys {
                let mut found = false;
                for x in xs {
                    if contains(x, y).unwrap_or(false) { found = true; break; }
                }
                if !found { return Ok(false); }
            }
            Ok(true)
        }
        (Value::Map(xm), Value::Map(ym)) => {
            for (k, y) in ym {
                match xm.get(k) {
                    Some(x) if contains(x, y)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (x, y) if x.jq_type_name() == y.jq_type_name() => Ok(x == y),
        (x, y) => Err(ExprError::eval(format!("{} and {} cannot have their containment checked", x.jq_type_name(), y.jq_type_name()))),
    }
}

fn string_arg(b: &str, v: &Value) -> Result<String, ExprError> {
    v.as_str().map(str::to_string).ok_or_else(|| ExprError::eval(format!("{} requires string inputs", b)))
}

fn elements(input: &Value, what: &str) -> Result<Vec<Value>, ExprError> {
    match input {
        Value::List(items) => Ok(items.clone()),
        Value::Map(m) => Ok(m.values().cloned().collect()),
        other => Err(ExprError::eval(format!("Cannot iterate over {} in {}", other.jq_type_name(), what))),
    }
}

fn call(b: Builtin, args: &[Ast], input: &Value, scope: &Scope<'_>, out: &mut Out) -> Result<(), ExprError> {
    use Builtin::*;
    match b {
        Empty => {}
        Select => {
            for c in collect(&args[0], input, scope)? {
                if c.is_truthy() {
                    out.push(input.clone());
                }
            }
        }
        Not => out.push(Value::Bool(!input.is_truthy())),
        Length => out.push(match input {
            Value::Null => Value::Int(0),
            Value::Int(i) => Value::Int(i.abs()),
            Value::Float(f) => Value::Float(f.abs()),
            Value::String(s) => Value::Int(s.chars().count() as i64),
            Value::List(items) => Value::Int(items.len() as i64),
            Value::Map(m) => Value::Int(m.len() as i64),
            other => return Err(ExprError::eval(format!("{} has no length", other.jq_type_name()))),
        }),
        Keys => out.push(match input {
            Value::Map(m) => Value::List(m.keys().map(|k| Value::from(k.as_str())).collect()),
            Value::List(items) => Value::List((0..items.len() as i64).map(Value::Int).collect()),
            other => return Err(ExprError::eval(format!("{} has no keys", other.jq_type_name()))),
        }),
        Has => {
            for k in collect(&args[0], input, scope)? {
                out.push(Value::Bool(match (input, &k) {
                    (Value::Map(m), Value::String(s)) => m.contains_key(s),
                    (Value::List(items), n) if n.as_f64().is_some() => {
                        let i = n.as_f64().unwrap_or_default();
                        i >= 0.0 && (i as usize) < items.len()
                    }
                    (t, k) => {
                        return Err(ExprError::eval(format!("Cannot check whether {} has a {} key", t.jq_type_name(), k.jq_type_name())))
                    }
                }));
            }
        }
        Map => {
            let mut mapped = Vec::new();
            for item in elements(input, "map")? {
                eval(&args[0], &item, scope, &mut mapped)?;
            }
            out.push(Value::List(mapped));
        }
        First => out.push(index_value(input, &Value::Int(0))?),
        Last => out.push(index_value(input, &Value::Int(-1))?),
        FirstOf => {
            if let Some(v) = collect(&args[0], input, scope)?.into_iter().next() {
                out.push(v);
            }
        }
        LastOf => {
            if let Some(v) = collect(&args[0], input, scope)?.pop() {
                out.push(v);
            }
        }
        Type => out.push(Value::from(input.jq_type_name())),
        ToString => out.push(match input {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_json().to_string()),
        }),
        ToNumber => out.push(match input {
            Value::Int(_) | Value::Float(_) => input.clone(),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Float(
                    s.trim().parse::<f64>().map_err(|_| ExprError::eval(format!("Cannot parse {:?} as a number", s)))?,
                ),
            },
            other => return Err(ExprError::eval(format!("{} cannot be parsed as a number", other.jq_type_name()))),
        }),
        AsciiDowncase => out.push(Value::String(string_arg("ascii_downcase", input)?.to_ascii_lowercase())),
        AsciiUpcase => out.push(Value::String(string_arg("ascii_upcase", input)?.to_ascii_uppercase())),
        StartsWith | EndsWith => {
            let name = if b == StartsWith { "startswith" } else { "endswith" };
            let s = string_arg(name, input)?;
            for p in collect(&args[0], input, scope)? {
                let p = string_arg(name, &p)?;
                out.push(Value::Bool(if b == StartsWith { s.starts_with(&p) } else { s.ends_with(&p) }));
            }
        }
        Contains => {
            for needle in collect(&args[0], input, scope)? {
                out.push(Value::Bool(contains(input, &needle)?));
            }
        }
        Any => out.push(Value::Bool(elements(input, "any")?.iter().any(Value::is_truthy))),
        All => out.push(Value::Bool(elements(input, "all")?.iter().all(Value::is_truthy))),
        AnyOf | AllOf => {
            let want_any = b == AnyOf;
            let mut result = !want_any;
            for item in elements(input, if want_any { "any" } else { "all" })? {
                let hit = collect(&args[0], &item, scope)?.iter().any(Value::is_truthy);
                if hit == want_any {
                    result = want_any;
                    break;
                }
            }
            out.push(Value::Bool(result));
        }
        Add => {
            let mut acc = Value::Null;
            for item in elements(input, "add")? {
                acc = binary(BinOp::Add, &acc, &item)?;
            }
            out.push(acc);
        }
        Test => {
            let s = string_arg("test", input)?;
            for re in collect(&args[0], input, scope)? {
                let re = string_arg("test", &re)?;
                let re = regex::Regex::new(&re).map_err(|e| ExprError::eval(format!("invalid regex: {}", e)))?;
                out.push(Value::Bool(re.is_match(&s)));
            }
        }
        Now => {
            let micros = scope.now.timestamp_micros();
            out.push(Value::Float(micros as f64 / 1e6));
        }
        Join => {
            for sep in collect(&args[0], input, scope)? {
                let sep = string_arg("join", &sep)?;
                let mut parts = Vec::new();
                for item in elements(input, "join")? {
                    parts.push(match item {
                        Value::Null => String::new(),
                        Value::String(s) => s,
                        Value::Bool(_) | Value::Int(_) | Value::Float(_) => item.to_match_string(),
                        other => return Err(ExprError::eval(format!("Cannot join with {}", other.jq_type_name()))),
                    });
                }
                out.push(Value::String(parts.join(&sep)));
            }
        }
        Split => {
            let s = string_arg("split", input)?;
            for sep in collect(&args[0], input, scope)? {
                out.push(split(&s, &string_arg("split", &sep)?));
            }
        }
        ToEntries => match input {
            Value::Map(m) => out.push(Value::List(
                m.iter()
                    .map(|(k, v)| {
                        let mut e = BTreeMap::new();
                        e.insert("key".to_string(), Value::from(k.as_str()));
                        e.insert("value".to_string(), v.clone());
                        Value::Map(e)
                    })
                    .collect(),
            )),
            other => return Err(ExprError::eval(format!("{} has no keys", other.jq_type_name()))),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jq::JqProgram;
    use crate::Program;
    use serde_json::json;

    fn run(src: &str, doc: serde_json::Value) -> Result<Vec<serde_json::Value>, ExprError> {
        let p = JqProgram::compile(src)?;
        let doc = Value::from_json(&doc);
        Ok(p.evaluate(&Scope::new(&doc))?.iter().map(Value::to_json).collect())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("1 + 2 * 3", json!(null)).unwrap(), vec![json!(7)]);
        assert_eq!(run("7 / 2", json!(null)).unwrap(), vec![json!(3.5)]);
        assert_eq!(run("7 % 3", json!(null)).unwrap(), vec![json!(1)]);
        assert_eq!(run("\"a\" + \"b\"", json!(null)).unwrap(), vec![json!("ab")]);
        assert_eq!(run("null + 1", json!(null)).unwrap(), vec![json!(1)]);
        assert!(run("1 / 0", json!(null)).is_err());
        assert!(run("\"a\" - 1", json!(null)).is_err());
    }

    #[test]
    fn modulus_by_most_negative_divisor() {
        let doc = json!({"a": 5, "b": i64::MIN, "m": i64::MIN});
        assert_eq!(run(".a % .b", doc.clone()).unwrap(), vec![json!(5)]);
        assert_eq!(run(".m % .b", doc.clone()).unwrap(), vec![json!(0)]);
        assert_eq!(run("-7 % .b", doc.clone()).unwrap(), vec![json!(-7)]);
        assert_eq!(run("-7 % 3", doc.clone()).unwrap(), vec![json!(-1)]);
        assert_eq!(run("-.m", doc).unwrap(), vec![json!(9.223372036854776e18)]);
    }

    #[test]
    fn builtins() {
        let doc = json!({"metadata": {"labels": {"b": "2", "a": "1"}, "name": "Web-1"}, "items": [1, 2, 3]});
        assert_eq!(run(".metadata.labels | keys", doc.clone()).unwrap(), vec![json!(["a", "b"])]);
        assert_eq!(run(".metadata.labels | has(\"a\")", doc.clone()).unwrap(), vec![json!(true)]);
        assert_eq!(run(".items | map(. * 2)", doc.clone()).unwrap(), vec![json!([2, 4, 6])]);
        assert_eq!(run(".items | add", doc.clone()).unwrap(), vec![json!(6)]);
        assert_eq!(run(".items | first, last", doc.clone()).unwrap(), vec![json!(1), json!(3)]);
        assert_eq!(run(".items | any(. > 2)", doc.clone()).unwrap(), vec![json!(true)]);
        assert_eq!(run(".items | all(. > 2)", doc.clone()).unwrap(), vec![json!(false)]);
        assert_eq!(run(".metadata.name | ascii_downcase", doc.clone()).unwrap(), vec![json!("web-1")]);
        assert_eq!(run(".metadata.name | test(\"^Web-[0-9]+$\")", doc.clone()).unwrap(), vec![json!(true)]);
        assert_eq!(run(".metadata.name | startswith(\"Web\")", doc.clone()).unwrap(), vec![json!(true)]);
        assert_eq!(run(".items | join(\",\")", doc.clone()).unwrap(), vec![json!("1,2,3")]);
        assert_eq!(run("\"a,b\" | split(\",\")", doc.clone()).unwrap(), vec![json!(["a", "b"])]);
        assert_eq!(run("[.items[] | tostring]", doc.clone()).unwrap(), vec![json!(["1", "2", "3"])]);
        assert_eq!(run("\"12\" | tonumber", doc.clone()).unwrap(), vec![json!(12)]);
        assert_eq!(run(".metadata | type", doc.clone()).unwrap(), vec![json!("object")]);
        assert_eq!(run("[.items[] | select(. != 2)]", doc).unwrap(), vec![json!([1, 3])]);
    }

    #[test]
    fn contains_is_recursive() {
        let doc = json!({"spec": {"tolerations": [{"key": "a", "effect": "NoSchedule"}]}});
        assert_eq!(run("contains({spec: {tolerations: [{key: \"a\"}]}})", doc.clone()).unwrap(), vec![json!(true)]);
        assert_eq!(run("contains({spec: {tolerations: [{key: \"b\"}]}})", doc).unwrap(), vec![json!(false)]);
    }

    #[test]
    fn slices_and_negative_indices() {
        let doc = json!([0, 1, 2, 3, 4]);
        assert_eq!(run(".[1:3]", doc.clone()).unwrap(), vec![json!([1, 2])]);
        assert_eq!(run(".[-2:]", doc.clone()).unwrap(), vec![json!([3, 4])]);
        assert_eq!(run(".[-1]", doc.clone()).unwrap(), vec![json!(4)]);
        assert_eq!(run(".[10]", doc).unwrap(), vec![json!(null)]);
        assert_eq!(run(".[1:3]", json!("hello")).unwrap(), vec![json!("el")]);
    }

    #[test]
    fn recurse_visits_every_node() {
        assert_eq!(run("[..] | length", json!({"a": [1, {"b": 2}]})).unwrap(), vec![json!(5)]);
    }

    #[test]
    fn and_or_short_circuit() {
        assert_eq!(run("false and (1 / 0 == 1)", json!(null)).unwrap(), vec![json!(false)]);
        assert_eq!(run(".a and .b", json!({"a": true, "b": 1})).unwrap(), vec![json!(true)]);
        assert_eq!(run(".a or .b", json!({"a": null, "b": false})).unwrap(), vec![json!(false)]);
        assert_eq!(run("(.a | not)", json!({"a": null})).unwrap(), vec![json!(true)]);
    }
}
