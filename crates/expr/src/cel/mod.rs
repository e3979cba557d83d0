//! A CEL subset with the kwok helper library (`Now`, `Rand`, `SinceSecond`,
//! `UnixSecond`, `Quantity`).
//!
//! Expressions see the document as `self` and under the lowercased resource
//! kind (`pod`, `node`, ...). Every expression yields exactly one value.

mod eval;
mod library;
mod parser;

use crate::{Dialect, ExprError, Program, Scope, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Macro {
    All,
    Exists,
    ExistsOne,
    Filter,
    Map,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Lit(Value),
    Ident(String),
    Select(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call { target: Option<Box<Expr>>, name: String, args: Vec<Expr> },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Has(Box<Expr>, String),
    Comprehension { kind: Macro, range: Box<Expr>, var: String, body: Box<Expr> },
}

/// Compiled CEL expression.
#[derive(Debug, Clone)]
pub struct CelProgram {
    source: String,
    expr: Expr,
}

impl CelProgram {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let expr = parser::parse(source)?;
        Ok(Self { source: source.to_string(), expr })
    }
}

impl Program for CelProgram {
    fn dialect(&self) -> Dialect { Dialect::Cel }

    fn source(&self) -> &str { &self.source }

    fn evaluate(&self, scope: &Scope<'_>) -> Result<Vec<Value>, ExprError> {
        let mut env = eval::Env::new(scope);
        Ok(vec![env.eval(&self.expr)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn pod() -> Value {
        Value::from_json(&json!({
            "metadata": {
                "name": "web-0",
                "creationTimestamp": "2024-05-01T12:00:00Z",
                "labels": {"app": "web"},
                "finalizers": ["a", "b"]
            },
            "spec": {"nodeName": "node-1", "containers": [{"name": "c", "image": "nginx"}]},
            "status": {"phase": "Pending"}
        }))
    }

    fn eval_at(src: &str, doc: &Value) -> Result<Value, ExprError> {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap();
        let p = CelProgram::compile(src)?;
        let mut out = p.evaluate(&Scope::new(doc).with_kind("pod").at(now))?;
        assert_eq!(out.len(), 1);
        Ok(out.remove(0))
    }

    #[test]
    fn field_selection_through_kind_and_self() {
        let doc = pod();
        assert_eq!(eval_at("pod.status.phase == 'Pending'", &doc).unwrap(), Value::Bool(true));
        assert_eq!(eval_at("self.spec.nodeName", &doc).unwrap(), Value::from("node-1"));
        assert_eq!(eval_at("size(self.metadata.finalizers)", &doc).unwrap(), Value::Int(2));
        assert_eq!(eval_at("self.metadata.finalizers.size() > 1 ? 'many' : 'few'", &doc).unwrap(), Value::from("many"));
    }

    #[test]
    fn has_and_missing_keys() {
        let doc = pod();
        assert_eq!(eval_at("has(self.spec.nodeName)", &doc).unwrap(), Value::Bool(true));
        assert_eq!(eval_at("has(self.metadata.deletionTimestamp)", &doc).unwrap(), Value::Bool(false));
        assert!(eval_at("self.metadata.deletionTimestamp != null", &doc).is_err());
    }

    #[test]
    fn logical_operators_absorb_errors() {
        let doc = pod();
        assert_eq!(eval_at("self.nope.x == 1 || true", &doc).unwrap(), Value::Bool(true));
        assert_eq!(eval_at("false && self.nope.x == 1", &doc).unwrap(), Value::Bool(false));
        assert!(eval_at("self.nope.x == 1 && true", &doc).is_err());
    }

    #[test]
    fn kwok_helpers() {
        let doc = pod();
        assert_eq!(eval_at("SinceSecond(pod)", &doc).unwrap(), Value::Int(30));
        assert_eq!(eval_at("UnixSecond(Now())", &doc).unwrap(), Value::Int(1_714_564_830));
        assert_eq!(eval_at("Quantity('1Gi').Value()", &doc).unwrap(), Value::Int(1_073_741_824));
        assert_eq!(eval_at("Quantity('500m') < Quantity('1')", &doc).unwrap(), Value::Bool(true));
        let r = eval_at("Rand()", &doc).unwrap().as_f64().unwrap();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn timestamp_and_duration_arithmetic() {
        let doc = pod();
        assert_eq!(
            eval_at("Now() - self.metadata.creationTimestamp", &doc).unwrap(),
            Value::Duration(chrono::Duration::seconds(30))
        );
        assert_eq!(
            eval_at("timestamp(self.metadata.creationTimestamp) + duration('1m') > Now()", &doc).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval_at("duration('90s') == duration('1m30s')", &doc).unwrap(), Value::Bool(true));
    }

    #[test]
    fn macros() {
        let doc = pod();
        assert_eq!(eval_at("self.spec.containers.exists(c, c.image == 'nginx')", &doc).unwrap(), Value::Bool(true));
        assert_eq!(eval_at("self.metadata.finalizers.all(f, f.size() == 1)", &doc).unwrap(), Value::Bool(true));
        assert_eq!(eval_at("self.metadata.finalizers.map(f, f + '!')", &doc).unwrap(), Value::List(vec!["a!".into(), "b!".into()]));
        assert_eq!(eval_at("[1, 2, 3].filter(x, x % 2 == 1)", &doc).unwrap(), Value::List(vec![Value::Int(1), Value::Int(3)]));
        assert_eq!(eval_at("'a' in self.metadata.finalizers && 'app' in self.metadata.labels", &doc).unwrap(), Value::Bool(true));
    }

    #[test]
    fn overflow_and_type_errors() {
        let doc = pod();
        assert!(eval_at("9223372036854775807 + 1", &doc).is_err());
        assert!(eval_at("1 / 0", &doc).is_err());
        assert!(eval_at("!'x'", &doc).is_err());
        assert!(eval_at("unknownVar", &doc).is_err());
        assert!(CelProgram::compile("1 +").is_err());
        assert!(CelProgram::compile("has(x)").is_err());
    }
}
